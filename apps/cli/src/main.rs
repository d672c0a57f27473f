use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use livevars_settings::{
    CustomFunction, FunctionId, JsonFileStore, SettingsController, SettingsEvent,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_LEVEL: &str = "warn";
const PLUGIN_ID: &str = "live-variables";

#[derive(Parser)]
#[command(
    name = "livevars-cli",
    about = "Manage Live Variables plugin settings in an Obsidian vault",
    author,
    version
)]
struct Cli {
    /// 指定 vault 根目錄；預設為目前目錄。 / Vault root (defaults to current directory).
    #[arg(long, global = true, value_name = "PATH")]
    vault: Option<PathBuf>,

    /// 直接指定設定檔，略過 vault 位置。 / Settings document to use instead of the vault's data.json.
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// 日誌層級（trace、debug、info、warn、error）。 / Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 管理自訂 JS 函式。 / Manage saved custom JS functions.
    #[command(subcommand)]
    Functions(FunctionsCommand),
    /// 顯示或切換即時文字醒目提示。 / Show or toggle live text highlighting.
    Highlight(HighlightArgs),
}

#[derive(Subcommand)]
enum FunctionsCommand {
    /// 列出所有函式。 / List saved functions.
    List,
    /// 顯示單一函式的程式碼。 / Print one function's code.
    Show(RowArgs),
    /// 新增函式到清單末端。 / Append a new function.
    Add(AddArgs),
    /// 取代函式的程式碼。 / Replace a function's code.
    SetCode(SetCodeArgs),
    /// 重新命名函式。 / Rename a function.
    Rename(RenameArgs),
    /// 刪除函式。 / Delete a function.
    Delete(RowArgs),
}

#[derive(Args)]
struct RowArgs {
    /// 列表中的編號（從 1 開始）。 / Row number as shown by `functions list` (1-based).
    row: usize,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct CodeSource {
    /// 直接提供程式碼。 / Code text given inline.
    #[arg(long, value_name = "TEXT")]
    code: Option<String>,

    /// 從檔案讀取程式碼。 / Read the code text from a file.
    #[arg(long, value_name = "PATH")]
    code_file: Option<PathBuf>,
}

#[derive(Args)]
struct AddArgs {
    /// 函式名稱。 / Function name.
    name: String,

    #[command(flatten)]
    source: CodeSource,
}

#[derive(Args)]
struct SetCodeArgs {
    #[command(flatten)]
    row: RowArgs,

    #[command(flatten)]
    source: CodeSource,
}

#[derive(Args)]
struct RenameArgs {
    #[command(flatten)]
    row: RowArgs,

    /// 新的函式名稱。 / New function name.
    name: String,
}

#[derive(Args)]
struct HighlightArgs {
    /// 新狀態；省略時僅顯示目前狀態。 / New state; prints the current state when omitted.
    #[arg(value_enum)]
    state: Option<Toggle>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    #[value(alias = "true")]
    On,
    #[value(alias = "false")]
    Off,
}

impl From<Toggle> for bool {
    fn from(toggle: Toggle) -> Self {
        matches!(toggle, Toggle::On)
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Cli {
        vault,
        settings,
        log_level,
        command,
    } = Cli::parse();
    init_logging(&log_level)?;
    let settings_path = resolve_settings_path(vault, settings)?;
    debug!(path = %settings_path.display(), "using settings document");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(execute(command, &settings_path))
}

/// An explicit `--log-level` wins over `RUST_LOG`; the default level defers to it.
fn log_filter(level: &str) -> Result<EnvFilter> {
    let filter = if level != DEFAULT_LOG_LEVEL {
        EnvFilter::try_new(level)
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))
    };
    filter.with_context(|| format!("invalid log level '{level}'"))
}

fn init_logging(level: &str) -> Result<()> {
    let filter = log_filter(level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!(err))
}

async fn execute(command: Commands, settings_path: &Path) -> Result<()> {
    let mut controller = open_controller(settings_path).await?;
    match command {
        Commands::Functions(FunctionsCommand::List) => {
            warn_on_fallback(&controller);
            list_functions(&controller);
            Ok(())
        }
        Commands::Functions(FunctionsCommand::Show(args)) => {
            warn_on_fallback(&controller);
            let id = row_id(&controller, args.row)?;
            if let Some(function) = controller.function(id) {
                println!("{}", function.code);
            }
            Ok(())
        }
        Commands::Functions(FunctionsCommand::Add(args)) => {
            ensure_writable(&controller, settings_path)?;
            let code = read_code(&args.source)?;
            controller.add_function(CustomFunction::new(&args.name, code))?;
            commit(&controller, settings_path).await?;
            println!("Added custom function #{} ({})", controller.len(), args.name);
            Ok(())
        }
        Commands::Functions(FunctionsCommand::SetCode(args)) => {
            ensure_writable(&controller, settings_path)?;
            let id = row_id(&controller, args.row.row)?;
            let code = read_code(&args.source)?;
            controller.handle(SettingsEvent::EditCommit { id, code })?;
            commit(&controller, settings_path).await?;
            println!("Updated code of custom function #{}", args.row.row);
            Ok(())
        }
        Commands::Functions(FunctionsCommand::Rename(args)) => {
            ensure_writable(&controller, settings_path)?;
            let id = row_id(&controller, args.row.row)?;
            controller.handle(SettingsEvent::Rename {
                id,
                name: args.name.clone(),
            })?;
            commit(&controller, settings_path).await?;
            println!("Renamed custom function #{} to {}", args.row.row, args.name);
            Ok(())
        }
        Commands::Functions(FunctionsCommand::Delete(args)) => {
            ensure_writable(&controller, settings_path)?;
            let id = row_id(&controller, args.row)?;
            let removed = controller.delete_function(id)?;
            commit(&controller, settings_path).await?;
            println!("Deleted custom function {}", removed.name);
            Ok(())
        }
        Commands::Highlight(HighlightArgs { state: None }) => {
            warn_on_fallback(&controller);
            print_highlight(controller.highlight_text());
            Ok(())
        }
        Commands::Highlight(HighlightArgs { state: Some(state) }) => {
            ensure_writable(&controller, settings_path)?;
            controller.handle(SettingsEvent::ToggleChange(state.into()))?;
            commit(&controller, settings_path).await?;
            print_highlight(controller.highlight_text());
            Ok(())
        }
    }
}

async fn open_controller(settings_path: &Path) -> Result<SettingsController> {
    let store = JsonFileStore::new(settings_path);
    let mut controller = SettingsController::new(Arc::new(store))?;
    controller.initialize().await?;
    Ok(controller)
}

async fn commit(controller: &SettingsController, settings_path: &Path) -> Result<()> {
    controller
        .flush()
        .await
        .with_context(|| format!("failed to save {}", settings_path.display()))
}

fn ensure_writable(controller: &SettingsController, settings_path: &Path) -> Result<()> {
    if let Some(reason) = controller.load_error() {
        bail!(
            "refusing to modify {} because it could not be loaded: {reason}",
            settings_path.display()
        );
    }
    Ok(())
}

fn warn_on_fallback(controller: &SettingsController) {
    if let Some(reason) = controller.load_error() {
        eprintln!("Warning: showing empty settings; {reason}");
    }
}

fn row_id(controller: &SettingsController, row: usize) -> Result<FunctionId> {
    if row == 0 {
        bail!("row numbers start at 1");
    }
    controller
        .rows()
        .nth(row - 1)
        .map(|entry| entry.id)
        .ok_or_else(|| anyhow!("no custom function #{row}; {} saved", controller.len()))
}

fn read_code(source: &CodeSource) -> Result<String> {
    match (&source.code, &source.code_file) {
        (Some(code), _) => Ok(code.clone()),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read code from {}", path.display())),
        (None, None) => bail!("either --code or --code-file is required"),
    }
}

fn list_functions(controller: &SettingsController) {
    if controller.is_empty() {
        println!("No custom functions saved.");
        return;
    }
    for (index, row) in controller.rows().enumerate() {
        println!("#{}  {}", index + 1, row.function.name);
        for line in row.function.code.lines() {
            println!("    {line}");
        }
    }
}

fn print_highlight(state: Option<bool>) {
    let label = match state {
        Some(true) => "on",
        Some(false) => "off",
        None => "unset",
    };
    println!("Highlight live text: {label}");
}

fn resolve_settings_path(vault: Option<PathBuf>, settings: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = settings {
        return absolutize(path);
    }
    let vault_root = match vault {
        Some(path) => absolutize(path)?,
        None => std::env::current_dir().context("determine current directory")?,
    };
    Ok(vault_root
        .join(".obsidian")
        .join("plugins")
        .join(PLUGIN_ID)
        .join("data.json"))
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()
            .context("determine current directory")?
            .join(path))
    }
}
