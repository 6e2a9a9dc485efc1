//! Interactive terminal chat front-end: reads lines from stdin, prints the
//! reply, and keeps going until EOF or `/quit`.

use tokio::io::{AsyncBufReadExt, BufReader};

use super::ChatContext;

pub async fn run(context: ChatContext) {
    println!("Type a message, or /help for commands. Ctrl-D to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        if std::io::Write::flush(&mut std::io::stdout()).is_err() {
            break;
        }

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("failed to read from stdin: {e}");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "/quit" || trimmed == "/exit" {
            break;
        }

        let reply = context.handle_message(trimmed).await;
        println!("{reply}");
    }
}
