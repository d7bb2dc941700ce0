use anyhow::Result;
use clap::Parser;
use spacesync::config::default_config_dir;
use spacesync::core::status::pair_id;
use spacesync::logging::init_logging;
use spacesync::{
    ConflictPolicy, JsonStatusStore, LocalStorage, PolicyResolver, SpaceSync, SqliteStatusStore,
    StatusStore, Storage, SyncConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// 同步两个本地文件夹
#[derive(Debug, Parser)]
#[command(name = "spacesync", version, about)]
struct Cli {
    /// 主端目录（冲突时默认胜出）
    primary: PathBuf,

    /// 副端目录
    secondary: PathBuf,

    /// 配置目录（config.json、日志、状态数据库）
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// 使用 JSON 文件保存同步状态，而不是配置目录下的数据库
    #[arg(long)]
    status: Option<PathBuf>,

    /// 冲突解决策略: primary_wins, secondary_wins, newest_wins
    #[arg(long)]
    policy: Option<ConflictPolicy>,

    /// 连续执行的同步轮数（两端收敛后提前结束）
    #[arg(long, default_value_t = 1)]
    repeat: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    std::fs::create_dir_all(&config_dir)?;

    init_logging(&config_dir, true);

    let config = SyncConfig::load(&config_dir);
    let policy = cli.policy.unwrap_or(config.conflict_policy);

    let primary = LocalStorage::new(&cli.primary.to_string_lossy())?
        .with_excluded(config.excluded_names.clone());
    let secondary = LocalStorage::new(&cli.secondary.to_string_lossy())?
        .with_excluded(config.excluded_names.clone());
    let pair = pair_id(primary.name(), secondary.name());

    let store: Box<dyn StatusStore> = match &cli.status {
        Some(path) => Box::new(JsonStatusStore::new(path)),
        None => Box::new(SqliteStatusStore::connect(&config_dir.join("spacesync.db")).await?),
    };

    let resolver = PolicyResolver::new(policy)
        .with_normalizer(spacesync::core::ContentNormalizer::new(config.text_extensions.clone()));
    info!("冲突解决策略: {}", resolver.policy());
    let sync = SpaceSync::with_config(Arc::new(primary), Arc::new(secondary), config);

    let mut status = store.load(&pair).await?;
    let mut failed = false;

    for pass in 1..=cli.repeat.max(1) {
        let report = sync.sync_files(&mut status, &resolver).await?;
        // 每轮结束都保存，失败文件的状态未被修改，下次会重试
        store.save(&pair, &status).await?;

        println!(
            "第 {} 轮: {} 个操作 (复制 {}, 删除 {}, 冲突 {}, 失败 {})",
            pass,
            report.actions,
            report.copied,
            report.deleted,
            report.conflicts.len(),
            report.errors.len()
        );
        for conflict in &report.conflicts {
            println!("  冲突: {} -> {}", conflict.file_name, conflict.conflict_copy);
        }
        for err in &report.errors {
            println!("  失败: {}", err);
        }

        failed = !report.is_clean();
        if report.actions == 0 && !failed {
            info!("两端已一致");
            break;
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
