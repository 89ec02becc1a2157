//! Command execution.

use crate::Commands;
use colored::Colorize;
use rpclink_client::Client;
use serde_json::Value;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Ping => {
            client.ping().await?;
            Ok("PONG".green().to_string())
        }

        Commands::Methods => {
            let methods = client.list_methods().await?;
            if methods.is_empty() {
                return Ok("(peer does not list its methods)".dimmed().to_string());
            }
            Ok(methods
                .iter()
                .map(|m| m.cyan().to_string())
                .collect::<Vec<_>>()
                .join("\n"))
        }

        Commands::Call { method, args } => {
            let args = args
                .iter()
                .map(|arg| parse_json_arg(arg))
                .collect::<Result<Vec<_>, _>>()?;
            let result = client.call(&method, &args).await?;
            Ok(format_json(&result))
        }
    }
}

/// Parses an argument: @file.json, inline JSON, or else a plain string.
fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&content)?);
    }
    Ok(serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string())))
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_parse_inline_json_and_bare_strings() {
        assert_eq!(parse_json_arg("42").unwrap(), json!(42));
        assert_eq!(parse_json_arg("{\"a\":[1]}").unwrap(), json!({"a": [1]}));
        assert_eq!(parse_json_arg("\"quoted\"").unwrap(), json!("quoted"));
        assert_eq!(parse_json_arg("hello").unwrap(), json!("hello"));
    }

    #[test]
    fn test_parse_file_argument() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[true, null]").unwrap();
        let arg = format!("@{}", file.path().display());
        assert_eq!(parse_json_arg(&arg).unwrap(), json!([true, null]));

        assert!(parse_json_arg("@/nonexistent/args.json").is_err());
    }
}
