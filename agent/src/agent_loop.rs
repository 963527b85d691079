//! Agent loop controller: model call, sniff, execute or finalize, repeat.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, info_span, warn};

use crate::core::conversation::Conversation;
use crate::core::sniffer::Sniffer;
use crate::core::types::{CommandCandidate, ExecutionResult, Role, ToolDescriptor, Turn};
use crate::io::model::ModelClient;
use crate::io::shell::ShellRunner;

/// Progress notifications emitted while a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent<'a> {
    IterationStarted { iteration: u32, max_iterations: u32 },
    Reasoning(&'a str),
    CommandStarted(&'a CommandCandidate),
    CommandFinished {
        command: &'a str,
        result: &'a ExecutionResult,
    },
    FinalAnswer(&'a str),
}

/// Reason why `run_task` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The model gave an answer and the endpoint reported normal completion.
    Done,
    /// The iteration bound was reached first.
    MaxIterations,
}

/// Summary of one task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Last final-answer text seen, if any.
    pub final_answer: Option<String>,
    /// Model calls made.
    pub iterations: u32,
    pub commands_run: u32,
    pub stop: LoopStop,
    pub conversation: Conversation,
}

/// Per-task settings that do not belong to the model or the shell.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub max_iterations: u32,
    /// Directory commands run in.
    pub workdir: PathBuf,
    /// Conversation start date shown to the model (`YYYY-MM-DD`).
    pub start_date: String,
}

/// Drives one task at a time against a model and a shell.
pub struct AgentLoop<M, S> {
    model: M,
    shell: S,
    sniffer: Sniffer,
    tool: ToolDescriptor,
}

impl<M: ModelClient, S: ShellRunner> AgentLoop<M, S> {
    pub fn new(model: M, shell: S, sniffer: Sniffer) -> Self {
        let tool = ToolDescriptor::shell(sniffer.tool_name());
        Self {
            model,
            shell,
            sniffer,
            tool,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    /// Run `task` until the model finishes or `settings.max_iterations` model
    /// calls have been made.
    ///
    /// Endpoint failures abort the task with an error. Command failures are
    /// fed back to the model as ordinary output.
    pub fn run_task<F: FnMut(&LoopEvent<'_>)>(
        &self,
        task: &str,
        settings: &TaskSettings,
        mut on_event: F,
    ) -> Result<TaskOutcome> {
        let span = info_span!("task", max_iterations = settings.max_iterations);
        let _guard = span.enter();
        info!(task, "starting task");

        let mut conversation = Conversation::new(&self.tool, task, &settings.start_date);
        let mut final_answer: Option<String> = None;
        let mut commands_run = 0u32;
        let mut iterations = 0u32;

        while iterations < settings.max_iterations {
            iterations += 1;
            on_event(&LoopEvent::IterationStarted {
                iteration: iterations,
                max_iterations: settings.max_iterations,
            });

            let reply = self
                .model
                .complete(&conversation)
                .with_context(|| format!("call model (iteration {iterations})"))?;

            if !reply.reasoning.is_empty() {
                on_event(&LoopEvent::Reasoning(&reply.reasoning));
            }

            match self.sniffer.sniff(&reply) {
                Some(candidate) => {
                    debug!(provenance = ?candidate.provenance, "command found");
                    on_event(&LoopEvent::CommandStarted(&candidate));
                    let result = self.shell.execute(&candidate.command, &settings.workdir);
                    commands_run += 1;
                    if result.timed_out {
                        warn!(command = %candidate.command, "command timed out");
                    }
                    on_event(&LoopEvent::CommandFinished {
                        command: &candidate.command,
                        result: &result,
                    });
                    self.record_command(&mut conversation, &candidate.command, &result);
                }
                None => {
                    let answer = reply.answer_text();
                    if !answer.is_empty() {
                        on_event(&LoopEvent::FinalAnswer(answer));
                        conversation
                            .append(Turn::new(Role::Assistant, answer).with_channel("final"));
                        final_answer = Some(answer.to_string());
                    }
                    if reply.finished() {
                        info!(iterations, commands_run, "task complete");
                        return Ok(TaskOutcome {
                            final_answer,
                            iterations,
                            commands_run,
                            stop: LoopStop::Done,
                            conversation,
                        });
                    }
                    debug!(finish_reason = ?reply.finish_reason, "no command and not finished, continuing");
                }
            }
        }

        warn!(iterations, "max iterations reached");
        Ok(TaskOutcome {
            final_answer,
            iterations,
            commands_run,
            stop: LoopStop::MaxIterations,
            conversation,
        })
    }

    fn record_command(&self, conversation: &mut Conversation, command: &str, result: &ExecutionResult) {
        let recipient = self.tool.recipient();
        let call = serde_json::json!({ "command": command }).to_string();
        conversation.append(
            Turn::new(Role::Assistant, call)
                .with_channel("commentary")
                .with_recipient(recipient.clone()),
        );
        conversation.append(
            Turn::new(Role::Tool, format_tool_result(command, result))
                .with_name(recipient)
                .with_channel("commentary")
                .with_recipient("assistant"),
        );
    }
}

/// Tool turn body fed back to the model.
pub fn format_tool_result(command: &str, result: &ExecutionResult) -> String {
    format!(
        "Command: {command}\nExit code: {}\nOutput:\n{}",
        result.exit_code, result.output
    )
}
