//! `lakesweep manifest` commands.

use crate::config::LakesweepConfig;
use crate::models::{MarkId, MarkManifest, SweepReport};
use crate::storage::{FilesystemManifestStore, ManifestStore};
use crate::Result;
use clap::Subcommand;
use std::fmt::Write as _;

/// Addresses listed by `manifest show` before eliding.
const SHOWN_ADDRESSES: usize = 20;

/// Manifest subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum ManifestCommand {
    /// Show a stored manifest and its latest sweep report.
    Show {
        /// Repository name.
        #[arg(long)]
        repo: String,
        /// Mark id.
        #[arg(long)]
        mark_id: String,
    },
    /// List stored mark ids for a repository.
    List {
        /// Repository name.
        #[arg(long)]
        repo: String,
    },
}

/// Executes a manifest subcommand.
///
/// # Errors
///
/// Returns [`crate::Error::MarkNotFound`] or
/// [`crate::Error::ManifestCorrupt`] for a bad mark id.
pub fn execute(config: &LakesweepConfig, command: &ManifestCommand) -> Result<()> {
    let store = FilesystemManifestStore::new(&config.gc.manifest_dir);
    match command {
        ManifestCommand::Show { repo, mark_id } => {
            let mark_id = MarkId::new(mark_id.as_str());
            let manifest = store.get_manifest(repo, &mark_id)?;
            let report = store.latest_report(repo, &mark_id)?;
            print!("{}", render(&manifest, report.as_ref()));
        },
        ManifestCommand::List { repo } => {
            for mark_id in store.list_marks(repo)? {
                println!("{mark_id}");
            }
        },
    }
    Ok(())
}

/// Renders a manifest summary.
#[must_use]
pub fn render(manifest: &MarkManifest, report: Option<&SweepReport>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Mark:       {}", manifest.mark_id);
    let _ = writeln!(out, "Repository: {}", manifest.repository);
    let _ = writeln!(out, "Namespace:  {}", manifest.storage_namespace);
    let _ = writeln!(out, "Created:    {}", manifest.created_at.to_rfc3339());
    let _ = writeln!(
        out,
        "Retention:  default {} days, {} branch rules",
        manifest.rules.default_retention_days(),
        manifest.rules.branches().len()
    );
    let _ = writeln!(out, "Candidates: {}", manifest.len());
    for address in manifest.addresses.iter().take(SHOWN_ADDRESSES) {
        let _ = writeln!(out, "  {address}");
    }
    if manifest.len() > SHOWN_ADDRESSES {
        let _ = writeln!(out, "  ... and {} more", manifest.len() - SHOWN_ADDRESSES);
    }
    match report {
        Some(report) => {
            let _ = writeln!(out, "Last sweep: {}", report.summary());
        },
        None => {
            let _ = writeln!(out, "Last sweep: never");
        },
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GarbageCollectionRules, ObjectAddress};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_render_elides_long_lists() {
        let manifest = MarkManifest {
            mark_id: MarkId::new("m1"),
            repository: "repo".to_string(),
            storage_namespace: "local:///tmp/lake".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().expect("time"),
            rules: GarbageCollectionRules::with_default(7),
            addresses: (0..25).map(|i| ObjectAddress::new(format!("obj-{i:02}"))).collect(),
        };
        let text = render(&manifest, None);
        assert!(text.contains("Candidates: 25"));
        assert!(text.contains("  obj-19\n"));
        assert!(!text.contains("obj-20"));
        assert!(text.contains("... and 5 more"));
        assert!(text.contains("Last sweep: never"));
    }
}
