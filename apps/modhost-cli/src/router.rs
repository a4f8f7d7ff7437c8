//! Textual command parsing.
//!
//! Turns plain commands into [`Action`] values:
//!
//! | command                  | action_type    | payload                      |
//! |--------------------------|----------------|------------------------------|
//! | `run <name> [k=v ...]`   | `run.module`   | `{module: name, k: v, ...}`  |
//! | `status`                 | `query.status` | `{}`                         |
//! | `task <name>`            | `execute.task` | `{task_name: name}`          |
//! | `load <name>`            | `load.module`  | `{module: name}`             |
//! | `list`                   | `list.modules` | `{}`                         |

use modhost::Action;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("command '{0}' requires an argument")]
    MissingArgument(&'static str),
}

/// Parse one command line into an action attributed to `source`.
pub fn parse_command(command: &str, source: &str) -> Result<Action, RouterError> {
    let parts: Vec<&str> = command.split_whitespace().collect();
    let Some((&head, rest)) = parts.split_first() else {
        return Err(RouterError::Empty);
    };

    match head {
        "run" => {
            let Some((&module, args)) = rest.split_first() else {
                return Err(RouterError::MissingArgument("run"));
            };
            let mut payload = Map::new();
            payload.insert("module".to_owned(), Value::from(module));
            for arg in args {
                if let Some((key, value)) = arg.split_once('=') {
                    payload.insert(key.to_owned(), Value::from(value));
                }
            }
            Ok(Action::new("run.module", payload, source))
        }
        "status" => Ok(Action::new("query.status", Map::new(), source)),
        "task" => {
            let Some(&task_name) = rest.first() else {
                return Err(RouterError::MissingArgument("task"));
            };
            let mut payload = Map::new();
            payload.insert("task_name".to_owned(), Value::from(task_name));
            Ok(Action::new("execute.task", payload, source))
        }
        "load" => {
            let Some(&module) = rest.first() else {
                return Err(RouterError::MissingArgument("load"));
            };
            let mut payload = Map::new();
            payload.insert("module".to_owned(), Value::from(module));
            Ok(Action::new("load.module", payload, source))
        }
        "list" => Ok(Action::new("list.modules", Map::new(), source)),
        other => Err(RouterError::Unknown(other.to_owned())),
    }
}
