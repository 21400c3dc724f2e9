//! `lakesweep rules` commands.

use crate::client::ControlPlaneClient;
use crate::config::LakesweepConfig;
use crate::context::RunContext;
use crate::models::GarbageCollectionRules;
use crate::{Error, Result};
use clap::Subcommand;
use std::path::PathBuf;

/// Retention rule subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum RulesCommand {
    /// Print a repository's retention rules as JSON.
    Get {
        /// Repository name.
        #[arg(long)]
        repo: String,
    },
    /// Replace a repository's retention rules.
    Set {
        /// Repository name.
        #[arg(long)]
        repo: String,
        /// Rules file (JSON); stdin when omitted.
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

/// Executes a rules subcommand.
///
/// # Errors
///
/// Returns a validation error for bad rules, or any control-plane error.
pub fn execute(config: &LakesweepConfig, ctx: &RunContext, command: &RulesCommand) -> Result<()> {
    let client = ControlPlaneClient::from_config(&config.control_plane)?;
    match command {
        RulesCommand::Get { repo } => {
            let rules = client.get_gc_rules(ctx, repo)?;
            println!("{}", to_pretty_json(&rules)?);
        },
        RulesCommand::Set { repo, file } => {
            let json = match file {
                Some(path) => std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
                    operation: "read_rules".to_string(),
                    cause: format!("{}: {e}", path.display()),
                })?,
                None => std::io::read_to_string(std::io::stdin()).map_err(|e| {
                    Error::OperationFailed {
                        operation: "read_rules".to_string(),
                        cause: e.to_string(),
                    }
                })?,
            };
            let rules = GarbageCollectionRules::from_json(&json)?;
            client.set_gc_rules(ctx, repo, &rules)?;
            println!(
                "Updated retention rules for {repo}: default {} days, {} branch rules",
                rules.default_retention_days(),
                rules.branches().len()
            );
        },
    }
    Ok(())
}

fn to_pretty_json(rules: &GarbageCollectionRules) -> Result<String> {
    serde_json::to_string_pretty(rules).map_err(|e| Error::OperationFailed {
        operation: "serialize_rules".to_string(),
        cause: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetentionRule;

    #[test]
    fn test_pretty_json_uses_wire_names() {
        let rules = GarbageCollectionRules::new(7, vec![RetentionRule::new("main", 30)])
            .expect("valid rules");
        let json = to_pretty_json(&rules).expect("json");
        assert!(json.contains("\"default_retention_days\": 7"));
        assert!(json.contains("\"branch_id\": \"main\""));
        assert_eq!(GarbageCollectionRules::from_json(&json).expect("parse"), rules);
    }
}
