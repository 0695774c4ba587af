use futures::future::BoxFuture;
use serde_json::json;
use std::path::Path;

use super::MessageHandler;
use crate::error::Result;
use crate::ipc::{Connection, IncomingMessage, value_set};

/// Starts applications on behalf of the sandboxed app (`LaunchApp`).
#[derive(Debug, Default)]
pub struct ApplicationLaunchHandler;

/// Splits a command line into arguments, honouring double quotes.
fn split_parameters(parameters: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;

    for c in parameters.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    args.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        args.push(current);
    }
    args
}

impl ApplicationLaunchHandler {
    pub fn new() -> Self {
        Self
    }

    /// Spawns `application` directly, falling back to the platform opener for
    /// documents, folders and URIs. Several `|`-separated targets are opened one by one.
    pub async fn launch(&self, application: &str, parameters: &str, working_directory: &str) -> bool {
        let targets: Vec<&str> = application
            .split('|')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if targets.is_empty() {
            return false;
        }
        if targets.len() > 1 {
            return targets.iter().all(|target| open_with_default(target));
        }

        let target = targets[0];
        let mut command = tokio::process::Command::new(target);
        command.args(split_parameters(parameters));
        if !working_directory.is_empty() && Path::new(working_directory).is_dir() {
            command.current_dir(working_directory);
        }

        match command.spawn() {
            Ok(child) => {
                tracing::info!(
                    target: "handlers::app_launch",
                    application = target,
                    pid = child.id(),
                    "Application started"
                );
                true
            }
            Err(e) => {
                tracing::debug!(
                    target: "handlers::app_launch",
                    application = target,
                    error = %e,
                    "Direct start failed, trying the default handler"
                );
                open_with_default(target)
            }
        }
    }
}

fn open_with_default(target: &str) -> bool {
    match open::that_detached(target) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                target: "handlers::app_launch",
                application = target,
                error = %e,
                "Failed to open with the default handler"
            );
            false
        }
    }
}

impl MessageHandler for ApplicationLaunchHandler {
    fn name(&self) -> &'static str {
        "ApplicationLaunch"
    }

    fn parse_arguments<'a>(
        &'a self,
        connection: &'a Connection,
        message: &'a IncomingMessage,
        arguments: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if arguments != "LaunchApp" {
                return Ok(());
            }
            // Nothing to start and nothing to answer
            let Some(application) = message.get_str("Application") else {
                return Ok(());
            };

            let success = self
                .launch(
                    application,
                    message.get_str("Parameters").unwrap_or_default(),
                    message.get_str("WorkingDirectory").unwrap_or_default(),
                )
                .await;
            connection.send_message(value_set(json!({ "Success": success })), message.request_id())
        })
    }
}
