//! Command execution.

use crate::config::parse_value;
use crate::Commands;
use colored::Colorize;
use relstm_core::{Arg, Args, Identity, LoadOptions, Outcome, Runtime};
use relstm_query::Row;
use serde_json::Value;

/// Executes a command and returns the formatted output.
pub fn execute(runtime: &Runtime, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Machines => {
            let names = runtime.list_machines();
            if names.is_empty() {
                return Ok("No machines registered".yellow().to_string());
            }

            let mut output = format!("{}\n", "Machines:".bold());
            for name in names {
                let machine = runtime.machine(&name)?;
                let actions: Vec<&str> = machine
                    .definition()
                    .actions()
                    .map(|a| a.name.as_str())
                    .collect();
                output.push_str(&format!(
                    "  {} [table: {}, actions: {}]\n",
                    name.cyan(),
                    machine.definition().table,
                    actions.join(", ")
                ));
            }
            Ok(output.trim_end().to_string())
        }

        Commands::List { machine, filters } => {
            let filters: Row = filters.into_iter().collect();
            let items = runtime.machine(&machine)?.create_listing(&filters)?.execute()?;
            if items.is_empty() {
                return Ok(format!("No {} instances", machine).yellow().to_string());
            }

            let mut output = String::new();
            for item in &items {
                output.push_str(&format!(
                    "{} {} {}\n",
                    item.id.to_string().cyan(),
                    item.state.yellow(),
                    serde_json::to_string(&item.properties)?
                ));
            }
            output.push_str(&format!("{}: {}", "Instances".dimmed(), items.len()));
            Ok(output)
        }

        Commands::Show { machine, id } => {
            let id = parse_identity(&id);
            let loaded = runtime.load_ref(&machine, id.clone(), LoadOptions::default())?;
            if !loaded.done {
                return Ok(format!("{} {} {}", "Not found:".yellow(), machine, id));
            }

            let properties = loaded
                .properties
                .map(|p| Value::Object(p.into_iter().collect()))
                .unwrap_or(Value::Null);
            Ok(format!(
                "{}\n  state: {}\n  actions: {}\n{}",
                format!("Instance {} {}", machine.cyan(), id).bold(),
                loaded.state.unwrap_or_default().yellow(),
                loaded.actions.join(", "),
                format_json(&properties)
            ))
        }

        Commands::Invoke {
            machine,
            action,
            reference,
            args,
        } => {
            let mut call_args: Args = args
                .into_iter()
                .map(|(k, v)| (k, Arg::Value(v)))
                .collect();
            if !reference.is_empty() {
                call_args.insert(
                    relstm_core::invoker::REF_ARG.to_string(),
                    Arg::Value(parse_identity(&reference).to_value()),
                );
            }

            let invocation = runtime.invoke(&machine, &action, call_args)?;
            let outputs: serde_json::Map<String, Value> = invocation
                .outputs
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();

            let label = match invocation.outcome {
                Outcome::Succeeded => "Invoked".green(),
                Outcome::ExpectedFailure => "Failed".yellow(),
            };
            Ok(format!(
                "{} {}.{}\n{}",
                label,
                machine.cyan(),
                action,
                format_json(&Value::Object(outputs))
            ))
        }
    }
}

/// Builds an identity from positional command-line components.
fn parse_identity(components: &[String]) -> Identity {
    Identity::new(components.iter().map(|c| parse_value(c)).collect())
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
