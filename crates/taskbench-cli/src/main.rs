use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use taskbench_core::config::{DriverConfig, load_plan};
use taskbench_core::models::{Category, TaskSort};
use taskbench_core::orchestration::{discover, load_definitions, partition_runs, select};
use taskbench_core::persistence::{CompletionRecord, CompletionStore, FsCompletionStore};
use taskbench_core::sqlite::SqliteCompletionStore;

#[derive(Parser)]
#[command(name = "taskbench", version, about = "Benchmark task tree tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a task tree (or every entry of a batch plan) and preview its groups.
    Validate {
        tasks: Option<PathBuf>,
        #[arg(long, conflicts_with = "tasks")]
        plan: Option<PathBuf>,
        #[arg(long, env = "TASKBENCH_SHARDS", default_value_t = 1)]
        shards: usize,
        #[arg(long, env = "TASKBENCH_SHARD_INDEX", default_value_t = 0)]
        shard_index: usize,
        #[arg(long = "exclude")]
        exclude: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Summarize recorded verdicts.
    Status {
        #[arg(long, required_unless_present = "db")]
        results: Option<PathBuf>,
        #[arg(long, conflicts_with = "results")]
        db: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    taskbench_core::logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate {
            tasks,
            plan,
            shards,
            shard_index,
            exclude,
            json,
        } => {
            let configs = match (tasks, plan) {
                (_, Some(plan)) => load_plan(&plan)
                    .with_context(|| format!("loading plan {}", plan.display()))?,
                (Some(tasks), None) => {
                    let mut config = DriverConfig::new(tasks, "logs").shard(shards, shard_index);
                    config.exclude = exclude.into_iter().collect();
                    vec![config]
                }
                (None, None) => bail!("either a tasks path or --plan is required"),
            };

            tracing::debug!(configs = configs.len(), "previewing task plans");
            let mut reports = Vec::new();
            let mut failed = false;
            for config in &configs {
                let report = preview(config)?;
                failed |= report["rejected"].as_array().is_some_and(|r| !r.is_empty());
                reports.push(report);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&json!({ "plans": reports }))?);
            } else {
                reports.iter().for_each(print_preview);
            }

            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Status { results, db, json } => {
            let (store, source): (Box<dyn CompletionStore>, PathBuf) = match (db, results) {
                (Some(db), _) => (Box::new(SqliteCompletionStore::new(&db)), db),
                (None, Some(results)) => (Box::new(FsCompletionStore::new(&results)), results),
                (None, None) => bail!("either --results or --db is required"),
            };

            let records = store
                .list()
                .with_context(|| format!("reading results from {}", source.display()))?;
            let summary = summarize(&records);

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&source, &summary);
            }
            Ok(())
        }
    }
}

fn preview(config: &DriverConfig) -> Result<Value> {
    config
        .validate()
        .with_context(|| format!("invalid configuration for {}", config.tasks_path.display()))?;

    let files = select(
        discover(&config.tasks_path)?,
        &config.exclude,
        config.shards,
        config.shard_index,
    )?;
    let definitions = load_definitions(files);

    let mut loaded: Vec<(String, Category)> = definitions
        .loaded
        .into_iter()
        .map(|(file, definition)| (file.ident, definition.category()))
        .collect();
    loaded.sort_by(|left, right| sort_key(&left.1).cmp(&sort_key(&right.1)));

    let groups: Vec<Value> = partition_runs(&loaded, |(_, category)| category.clone())
        .into_iter()
        .map(|run| {
            let members = &loaded[run];
            json!({
                "category": members[0].1.to_string(),
                "tasks": members.iter().map(|(ident, _)| ident.as_str()).collect::<Vec<_>>(),
            })
        })
        .collect();

    let rejected: Vec<Value> = definitions
        .rejected
        .iter()
        .map(|(path, error)| {
            json!({
                "path": path.display().to_string(),
                "kind": format!("{:?}", error.kind),
                "message": error.message,
            })
        })
        .collect();

    Ok(json!({
        "tasks_path": config.tasks_path.display().to_string(),
        "shard": format!("{}/{}", config.shard_index, config.shards),
        "tasks": loaded.len(),
        "groups": groups,
        "rejected": rejected,
    }))
}

fn sort_key(category: &Category) -> (TaskSort, &str) {
    (category.sort, category.kind.as_str())
}

fn print_preview(report: &Value) {
    println!(
        "{} (shard {}): {} tasks",
        report["tasks_path"].as_str().unwrap_or_default(),
        report["shard"].as_str().unwrap_or_default(),
        report["tasks"]
    );
    for group in report["groups"].as_array().into_iter().flatten() {
        let tasks = group["tasks"].as_array().map(Vec::len).unwrap_or_default();
        println!(
            "  group {}: {tasks} tasks",
            group["category"].as_str().unwrap_or_default()
        );
    }
    for rejected in report["rejected"].as_array().into_iter().flatten() {
        println!(
            "  rejected {}: {}",
            rejected["path"].as_str().unwrap_or_default(),
            rejected["message"].as_str().unwrap_or_default()
        );
    }
}

fn summarize(records: &[CompletionRecord]) -> Value {
    let passed = records.iter().filter(|record| record.passed).count();
    let mut categories: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for record in records {
        let entry = categories
            .entry(record.category.as_deref().unwrap_or("unknown"))
            .or_default();
        if record.passed {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    let failed_idents: BTreeSet<&str> = records
        .iter()
        .filter(|record| !record.passed)
        .map(|record| record.ident.as_str())
        .collect();

    json!({
        "total": records.len(),
        "passed": passed,
        "failed": records.len() - passed,
        "categories": categories
            .into_iter()
            .map(|(category, (passed, failed))| {
                (category.to_string(), json!({ "passed": passed, "failed": failed }))
            })
            .collect::<serde_json::Map<_, _>>(),
        "failed_tasks": failed_idents,
    })
}

fn print_summary(source: &Path, summary: &Value) {
    println!(
        "{}: {} recorded, {} passed, {} failed",
        source.display(),
        summary["total"],
        summary["passed"],
        summary["failed"]
    );
    if let Some(categories) = summary["categories"].as_object() {
        for (category, counts) in categories {
            println!(
                "  {category}: {} passed, {} failed",
                counts["passed"], counts["failed"]
            );
        }
    }
    for ident in summary["failed_tasks"].as_array().into_iter().flatten() {
        println!("  failed {}", ident.as_str().unwrap_or_default());
    }
}
