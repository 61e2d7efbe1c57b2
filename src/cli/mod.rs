#![forbid(unsafe_code)]

use std::io::IsTerminal as _;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{CommandFactory as _, Parser, Subcommand};
use serde::Deserialize;

use crate::config::{self, Config};
use crate::error::TaskdeckError;
use crate::logging;
use crate::output::table::Table;
use crate::session::Session;
use crate::task::due_date;
use crate::task::model::{Task, TaskFilter};
use crate::task::store::TaskStore;
use crate::tui;

#[derive(Debug, Parser)]
#[command(name = "taskdeck", version, about = "A local to-do list")]
pub struct Cli {
    /// Directory holding the task data (overrides storage.data_dir)
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<String>,
    /// Debug logging on stderr
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(alias = "ls")]
    List(ListArgs),
    Show(ShowArgs),
    Add(AddArgs),
    Edit(EditArgs),
    Done(TargetArgs),
    Undo(TargetArgs),
    #[command(alias = "rm")]
    Remove(RemoveArgs),
    Import(ImportArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
    Version,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// all, completed or pending (defaults to ui.default_filter)
    #[arg(short = 'f', long = "filter")]
    pub filter: Option<TaskFilter>,
    /// Output in JSON format
    #[arg(long = "json", conflicts_with = "csv")]
    pub json: bool,
    /// Output in CSV format
    #[arg(long = "csv")]
    pub csv: bool,
}

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// Task id, id prefix or part of the title
    pub pattern: String,
}

#[derive(Debug, Parser)]
pub struct AddArgs {
    pub title: String,
    #[arg(short = 'd', long = "description")]
    pub description: Option<String>,
    /// YYYY-MM-DD or RFC 3339; not before today
    #[arg(long = "due")]
    pub due: Option<String>,
}

#[derive(Debug, Parser)]
pub struct EditArgs {
    /// Task id, id prefix or part of the title
    pub pattern: String,
    #[arg(long = "title")]
    pub title: Option<String>,
    #[arg(short = 'd', long = "description", conflicts_with = "clear_description")]
    pub description: Option<String>,
    #[arg(long = "clear-description")]
    pub clear_description: bool,
    #[arg(long = "due", conflicts_with = "clear_due")]
    pub due: Option<String>,
    #[arg(long = "clear-due")]
    pub clear_due: bool,
    #[arg(long = "completed")]
    pub completed: Option<bool>,
}

#[derive(Debug, Parser)]
pub struct TargetArgs {
    /// Task id, id prefix or part of the title
    pub pattern: String,
}

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Task id, id prefix or part of the title
    pub pattern: String,
    /// Skip the confirmation prompt
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,
}

#[derive(Debug, Parser)]
pub struct ImportArgs {
    /// YAML or JSON list of tasks
    pub file: String,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    List,
    Set(ConfigSetArgs),
    Get(ConfigGetArgs),
}

#[derive(Debug, Parser)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Parser)]
pub struct ConfigGetArgs {
    pub key: String,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // These never touch the task data.
    match &cli.cmd {
        Some(Commands::Completion(args)) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "taskdeck", &mut std::io::stdout());
            return Ok(ExitCode::SUCCESS);
        }
        Some(Commands::Version) => return Ok(cmd_version()),
        Some(Commands::Config(args)) => return cmd_config(args),
        _ => {}
    }

    let cfg = load_cfg().await?;
    let level = if cli.verbose { "debug" } else { cfg.log.level.as_str() };
    // Logging is best effort; the command still runs without it.
    let _logger = logging::init(level)
        .map_err(|e| eprintln!("warning: logging disabled: {e}"))
        .ok();

    let session = Session::open(cfg, cli.data_dir.as_deref()).await?;

    match cli.cmd {
        None => cmd_default(&session).await?,
        Some(Commands::List(args)) => cmd_list(&session, &args)?,
        Some(Commands::Show(args)) => cmd_show(&session.store, &args)?,
        Some(Commands::Add(args)) => cmd_add(&session.store, args).await?,
        Some(Commands::Edit(args)) => cmd_edit(&session.store, args).await?,
        Some(Commands::Done(args)) => cmd_set_completed(&session.store, &args, true).await?,
        Some(Commands::Undo(args)) => cmd_set_completed(&session.store, &args, false).await?,
        Some(Commands::Remove(args)) => cmd_remove(&session, &args).await?,
        Some(Commands::Import(args)) => cmd_import(&session.store, &args).await?,
        Some(Commands::Config(_) | Commands::Completion(_) | Commands::Version) => {}
    }

    Ok(ExitCode::SUCCESS)
}

async fn load_cfg() -> anyhow::Result<Config> {
    let cfg = tokio::task::spawn_blocking(|| -> anyhow::Result<Config> {
        let (cfg, _doc, _paths) = config::load()?;
        Ok(cfg)
    })
    .await??;
    Ok(cfg)
}

fn cmd_config(args: &ConfigArgs) -> anyhow::Result<ExitCode> {
    match &args.cmd {
        ConfigCmd::List => {
            print!("{}", config::list_resolved_toml()?);
        }
        ConfigCmd::Set(set) => {
            config::set_value_string(&set.key, &set.value)?;
            println!("Set {} = {}", set.key, set.value);
        }
        ConfigCmd::Get(get) => match config::get_value_string(&get.key)? {
            Some(v) => println!("{v}"),
            None => anyhow::bail!(
                "configuration key '{}' not found - use 'taskdeck config list' to see available keys",
                get.key
            ),
        },
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_default(session: &Session) -> anyhow::Result<()> {
    if tui::is_tty() {
        return tui::app::run(session).await;
    }

    // Non-TTY fallback: the list with config defaults.
    let args = ListArgs {
        filter: None,
        json: false,
        csv: false,
    };
    cmd_list(session, &args)
}

fn cmd_list(session: &Session, args: &ListArgs) -> anyhow::Result<()> {
    let filter = args.filter.unwrap_or(session.cfg.ui.default_filter);
    let tasks = session.store.filtered(filter);

    if args.json {
        let mut s = serde_json::to_string_pretty(&tasks)?;
        s.push('\n');
        print!("{s}");
        return Ok(());
    }

    if args.csv {
        let mut t = Table::new(["id", "title", "completed", "due_date", "description"]);
        for task in &tasks {
            t.row([
                task.id.clone(),
                task.title.clone(),
                task.completed.to_string(),
                task.due_date.clone().unwrap_or_default(),
                task.description.clone().unwrap_or_default(),
            ]);
        }
        t.print_csv()?;
        return Ok(());
    }

    let counts = session.store.counts();
    println!("{}", counts.summary());
    if tasks.is_empty() {
        if counts.total > 0 {
            println!("No {filter} tasks.");
        }
        return Ok(());
    }
    println!();

    let today = due_date::today_utc();
    let mut t = Table::new(["", "ID", "TITLE", "DUE"]);
    for task in &tasks {
        let due = task.due_date.as_deref().map_or_else(
            || "-".to_owned(),
            |d| {
                let shown = due_date::format_display(d);
                if !task.completed && due_date::is_overdue(d, today) {
                    format!("{shown} (overdue)")
                } else {
                    shown
                }
            },
        );
        t.row([
            status_marker(task, session.cfg.ui.icons).to_owned(),
            short_id(&task.id),
            truncate(&task.title, 60),
            due,
        ]);
    }
    t.print()?;
    Ok(())
}

fn cmd_show(store: &TaskStore, args: &ShowArgs) -> anyhow::Result<()> {
    let task = resolve_task(&store.snapshot(), &args.pattern)?;
    print_task_details(&task);
    Ok(())
}

async fn cmd_add(store: &TaskStore, args: AddArgs) -> anyhow::Result<()> {
    let title = args.title.trim();
    if title.is_empty() {
        return Err(TaskdeckError::Validation("Title is required".to_owned()).into());
    }

    let mut task = Task::new(title);
    task.description = non_empty(args.description);
    if let Some(due) = args.due.as_deref() {
        task.due_date = Some(due_date::parse_input(due, due_date::today_utc())?);
    }

    let (id, title) = (task.id.clone(), task.title.clone());
    store.add_task(task).await?;
    println!("Added task '{title}' ({})", short_id(&id));
    Ok(())
}

async fn cmd_edit(store: &TaskStore, args: EditArgs) -> anyhow::Result<()> {
    let current = resolve_task(&store.snapshot(), &args.pattern)?;
    let mut updated = current.clone();

    if let Some(title) = args.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(TaskdeckError::Validation("Title is required".to_owned()).into());
        }
        title.clone_into(&mut updated.title);
    }
    if args.clear_description {
        updated.description = None;
    } else if args.description.is_some() {
        updated.description = non_empty(args.description);
    }
    if args.clear_due {
        updated.due_date = None;
    } else if let Some(due) = args.due.as_deref() {
        updated.due_date = Some(due_date::parse_input(due, due_date::today_utc())?);
    }
    if let Some(completed) = args.completed {
        updated.completed = completed;
    }

    if updated == current {
        println!("Nothing to change for '{}'", current.title);
        return Ok(());
    }

    store.update_task(updated).await?;
    println!("Updated task '{}' ({})", current.title, short_id(&current.id));
    Ok(())
}

async fn cmd_set_completed(
    store: &TaskStore,
    args: &TargetArgs,
    completed: bool,
) -> anyhow::Result<()> {
    let mut task = resolve_task(&store.snapshot(), &args.pattern)?;
    task.completed = completed;
    let title = task.title.clone();
    store.update_task(task).await?;
    if completed {
        println!("Marked '{title}' as completed");
    } else {
        println!("Marked '{title}' as pending");
    }
    Ok(())
}

async fn cmd_remove(session: &Session, args: &RemoveArgs) -> anyhow::Result<()> {
    let task = resolve_task(&session.store.snapshot(), &args.pattern)?;

    if !args.yes && session.cfg.ui.confirm_delete && !confirm_delete(&task)? {
        println!("Cancelled.");
        return Ok(());
    }

    session.store.delete_task(&task.id).await?;
    println!("Deleted task '{}'", task.title);
    Ok(())
}

fn confirm_delete(task: &Task) -> anyhow::Result<bool> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("refusing to delete without confirmation (pass --yes)");
    }
    print!("Delete task '{}'? (y/N): ", task.title);
    std::io::Write::flush(&mut std::io::stdout())?;
    let mut input = String::new();
    let _ = std::io::stdin().read_line(&mut input)?;
    let resp = input.trim().to_lowercase();
    Ok(resp == "y" || resp == "yes")
}

/// One entry of an import file. `list --json` output is accepted as-is.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportEntry {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default, alias = "due_date")]
    due_date: Option<String>,
}

fn parse_import(data: &str, existing: &[Task]) -> anyhow::Result<(Vec<Task>, usize)> {
    let entries: Vec<ImportEntry> = serde_yaml::from_str(data)?;

    let mut tasks: Vec<Task> = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;
    for (i, entry) in entries.into_iter().enumerate() {
        let title = entry.title.trim();
        if title.is_empty() {
            anyhow::bail!("entry {}: Title is required", i + 1);
        }
        let id = match entry.id.filter(|id| !id.trim().is_empty()) {
            Some(id) if existing.iter().chain(&tasks).any(|t| t.id == id) => {
                skipped += 1;
                continue;
            }
            Some(id) => id,
            None => Task::new_id(),
        };
        let due_date = entry
            .due_date
            .as_deref()
            .map(due_date::normalize)
            .transpose()
            .with_context(|| format!("entry {}", i + 1))?;

        tasks.push(Task {
            id,
            title: title.to_owned(),
            description: non_empty(entry.description),
            completed: entry.completed,
            due_date,
        });
    }
    Ok((tasks, skipped))
}

async fn cmd_import(store: &TaskStore, args: &ImportArgs) -> anyhow::Result<()> {
    let data = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file))?;
    let (tasks, skipped) = parse_import(&data, &store.snapshot())
        .with_context(|| format!("failed to parse {}", args.file))?;

    let count = tasks.len();
    for task in tasks {
        store.add_task(task).await?;
    }
    println!("Imported {count} task(s)");
    if skipped > 0 {
        println!("Skipped {skipped} task(s) whose id already exists");
    }
    Ok(())
}

fn cmd_version() -> ExitCode {
    println!("taskdeck version {}", env!("CARGO_PKG_VERSION"));
    println!("  rust: {}", rustc_version_runtime::version());
    println!(
        "  os/arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::SUCCESS
}

/// Exact id, then id prefix, then case-insensitive title substring.
fn resolve_task(tasks: &[Task], pattern: &str) -> Result<Task, TaskdeckError> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Err(TaskdeckError::TaskNotFound(String::new()));
    }
    if let Some(t) = tasks.iter().find(|t| t.id == pattern) {
        return Ok(t.clone());
    }

    let by_prefix: Vec<&Task> = tasks.iter().filter(|t| t.id.starts_with(pattern)).collect();
    let matches = if by_prefix.is_empty() {
        let needle = pattern.to_lowercase();
        tasks
            .iter()
            .filter(|t| t.title.to_lowercase().contains(&needle))
            .collect()
    } else {
        by_prefix
    };

    match matches.as_slice() {
        [] => Err(TaskdeckError::TaskNotFound(pattern.to_owned())),
        [one] => Ok((*one).clone()),
        many => Err(TaskdeckError::AmbiguousTask {
            pattern: pattern.to_owned(),
            count: many.len(),
        }),
    }
}

fn print_task_details(task: &Task) {
    println!("Task: {} (ID: {})", task.title, task.id);
    println!(
        "Status: {}",
        if task.completed { "completed" } else { "pending" }
    );
    if let Some(due) = task.due_date.as_deref() {
        let overdue = !task.completed && due_date::is_overdue(due, due_date::today_utc());
        println!(
            "Due: {}{}",
            due_date::format_display(due),
            if overdue { " (overdue)" } else { "" }
        );
    }
    if let Some(desc) = task.description.as_deref()
        && !desc.trim().is_empty()
    {
        println!("\nDescription:\n{desc}");
    }
}

fn status_marker(task: &Task, icons: bool) -> &'static str {
    match (icons, task.completed) {
        (true, true) => "✓",
        (true, false) => "○",
        (false, true) => "[x]",
        (false, false) => "[ ]",
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn truncate(s: &str, max: usize) -> String {
    let mut out: String = s.chars().take(max).collect();
    if s.chars().count() > max {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, title: &str) -> Task {
        Task {
            id: id.to_owned(),
            title: title.to_owned(),
            description: None,
            completed: false,
            due_date: None,
        }
    }

    #[test]
    fn resolves_by_id_prefix_then_title() {
        let tasks = vec![
            task("abc123", "Buy milk"),
            task("abd456", "Walk the dog"),
            task("ffe789", "Buy bread"),
        ];

        assert_eq!(resolve_task(&tasks, "abc123").unwrap().title, "Buy milk");
        assert_eq!(resolve_task(&tasks, "abd").unwrap().title, "Walk the dog");
        assert_eq!(resolve_task(&tasks, "dog").unwrap().id, "abd456");
        assert!(matches!(
            resolve_task(&tasks, "ab"),
            Err(TaskdeckError::AmbiguousTask { count: 2, .. })
        ));
        assert!(matches!(
            resolve_task(&tasks, "buy"),
            Err(TaskdeckError::AmbiguousTask { .. })
        ));
        assert!(matches!(
            resolve_task(&tasks, "nothing"),
            Err(TaskdeckError::TaskNotFound(_))
        ));
    }

    #[test]
    fn import_accepts_yaml_and_skips_known_ids() {
        let existing = vec![task("keep", "Already here")];
        let yaml = r"
- title: Plan trip
  description: book hotel
  dueDate: 2001-02-03
- id: keep
  title: Duplicate
- title: Pay rent
  completed: true
";
        let (tasks, skipped) = parse_import(yaml, &existing).unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "Plan trip");
        assert_eq!(tasks[0].due_date.as_deref(), Some("2001-02-03T00:00:00Z"));
        assert!(tasks[1].completed);
        assert_ne!(tasks[0].id, tasks[1].id);
    }

    #[test]
    fn import_accepts_list_json_output() {
        let json = serde_json::to_string(&vec![task("x1", "From export")]).unwrap();
        let (tasks, skipped) = parse_import(&json, &[]).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(tasks[0].id, "x1");
    }

    #[test]
    fn import_rejects_empty_titles() {
        assert!(parse_import("- title: '  '\n", &[]).is_err());
    }

    #[test]
    fn cli_parses_filters() {
        let cli = Cli::try_parse_from(["taskdeck", "list", "--filter", "completed"]).unwrap();
        match cli.cmd {
            Some(Commands::List(args)) => assert_eq!(args.filter, Some(TaskFilter::Completed)),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["taskdeck", "list", "--filter", "soon"]).is_err());
        assert!(Cli::try_parse_from(["taskdeck", "list", "--json", "--csv"]).is_err());
    }

    #[test]
    fn markers_follow_icon_setting() {
        let mut t = task("1", "x");
        assert_eq!(status_marker(&t, true), "○");
        t.completed = true;
        assert_eq!(status_marker(&t, false), "[x]");
    }
}
