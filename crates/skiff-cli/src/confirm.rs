//! Confirmation prompts on stdin
//!
//! Answers: `y` approve, `a` approve and remember for the session,
//! `n` reject, `n: <feedback>` reject and tell the model why.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use skiff_core::agent::{ConfirmationPrompt, Decision, PendingConfirmation};

/// Parse one answer line. `None` means ask again.
pub fn parse_decision(line: &str) -> Option<Decision> {
    let line = line.trim();
    if let Some((answer, feedback)) = line.split_once(':') {
        if matches!(answer.trim().to_ascii_lowercase().as_str(), "n" | "no") {
            let feedback = feedback.trim();
            return Some(Decision::Rejected(
                (!feedback.is_empty()).then(|| feedback.to_string()),
            ));
        }
        return None;
    }

    match line.to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(Decision::Approved),
        "a" | "always" => Some(Decision::ApprovedRemember),
        "n" | "no" | "" => Some(Decision::Rejected(None)),
        _ => None,
    }
}

fn render(pending: &PendingConfirmation) -> String {
    let mut text = format!(
        "\n[{}] {}: {}\n",
        pending.category.label(),
        pending.operation,
        pending.target
    );
    if let Some(preview) = &pending.preview {
        text.push_str(preview);
        if !preview.ends_with('\n') {
            text.push('\n');
        }
    }
    text.push_str("Allow? [y]es / [a]lways / [n]o / n: feedback > ");
    text
}

/// Answer prompts from stdin until the gate goes away.
///
/// Prompts still open when stdin closes are dropped, which rejects them.
pub async fn run_prompt_loop(mut prompts: mpsc::UnboundedReceiver<ConfirmationPrompt>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(prompt) = prompts.recv().await {
        let decision = loop {
            let _ = stdout.write_all(render(&prompt.pending).as_bytes()).await;
            let _ = stdout.flush().await;

            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(decision) = parse_decision(&line) {
                        break Some(decision);
                    }
                }
                Ok(None) => break None,
                Err(e) => {
                    tracing::error!("Failed to read confirmation from stdin: {}", e);
                    break None;
                }
            }
        };

        match decision {
            Some(decision) => {
                tracing::info!(target_name = %prompt.pending.target, ?decision, "Confirmation answered");
                prompt.respond(decision);
            }
            None => {
                eprintln!("stdin closed, rejecting pending operations");
                return;
            }
        }
    }
}
