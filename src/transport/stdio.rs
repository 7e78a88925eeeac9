//! Line-delimited JSON-RPC over stdin/stdout
//!
//! One request per line in, one response per line out. Anything written to
//! stdout that is not a response corrupts the stream, so logging goes to
//! stderr.

use super::tools::{RpcRequest, RpcResponse, ToolServer, PARSE_ERROR};
use crate::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Serve the tool server on the process's stdin and stdout until EOF
pub async fn run_stdio(server: &ToolServer) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = tokio::io::stdout();
    serve(server, reader, writer).await
}

/// Serve requests from `reader` until it reaches EOF
pub async fn serve<R, W>(server: &ToolServer, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::info!(session_id = server.session_id(), "Tool server ready on stdio");

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(trimmed) {
            Ok(request) => {
                tracing::debug!(method = %request.method, "Request received");
                server.handle(request).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable request");
                Some(RpcResponse::failure(None, PARSE_ERROR, "Parse error"))
            }
        };

        if let Some(response) = response {
            let mut encoded = serde_json::to_vec(&response)?;
            encoded.push(b'\n');
            writer.write_all(&encoded).await?;
            writer.flush().await?;
        }
    }

    tracing::info!("Tool server input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Relay;
    use std::sync::Arc;

    async fn run_lines(input: &str) -> Vec<serde_json::Value> {
        let relay = Arc::new(Relay::in_memory().unwrap());
        let server = ToolServer::new(relay, "stdio-test").with_default_description("stdio");
        let mut output = Vec::new();
        serve(&server, input.as_bytes(), &mut output).await.unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_one_response_per_request() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
        );
        let responses = run_lines(input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let responses = run_lines("{not json\n").await;
        assert_eq!(responses.len(), 1);
        assert!(responses[0]["id"].is_null());
        assert_eq!(responses[0]["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_tool_call_over_stdio() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"send","arguments":{"message":"hello"}}}"#,
            "\n",
        );
        let responses = run_lines(input).await;
        assert_eq!(responses[0]["result"]["isError"], false);
        let text = responses[0]["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("broadcast"));
    }
}
