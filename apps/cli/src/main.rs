use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sublink_core_sdk::{
    db, llm,
    models::{ClientFormat, LlmConfig, NodeInfo, NodeInput},
    reply,
    server::{self, AppState},
    telemetry,
};

/**
 * \brief CLI 程序入口：管理 LLM 设置并调用节点整理/规则生成。
 */
#[derive(Parser, Debug)]
#[command(name = "sublink", version, about = "Sublink LLM node assistant")]
struct Cli {
    /** \brief 设置数据库路径 */
    #[arg(long, global = true, env = "SUBLINK_DB", default_value = db::DEFAULT_DB_PATH)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 保存 LLM API 设置。
     */
    Init {
        #[arg(long)]
        api_url: String,
        #[arg(long)]
        api_key: String,
        #[arg(long, default_value = "")]
        model: String,
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /**
     * \brief 测试 API 连接；未给出的参数取已保存的设置。
     */
    Test {
        #[arg(long)]
        api_url: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },

    /**
     * \brief 整理节点，nodes 为节点 JSON 数组文件。
     */
    Organize {
        #[arg(long)]
        nodes: PathBuf,
        #[arg(long, default_value = "")]
        instruction: String,
        /** \brief 解析回复并校验 nodeIds */
        #[arg(long, default_value_t = false)]
        validate: bool,
    },

    /**
     * \brief 生成订阅分流规则。
     */
    Rules {
        #[arg(long)]
        nodes: PathBuf,
        #[arg(long, default_value = "clash")]
        client: String,
        #[arg(long, default_value = "")]
        instruction: String,
        #[arg(long, default_value_t = false)]
        validate: bool,
    },

    /**
     * \brief 启动 HTTP 服务。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: String,
        #[arg(long, default_value_t = false)]
        demo_mode: bool,
    },
}

fn read_nodes(path: &Path) -> Result<Vec<NodeInfo>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read nodes file {} failed", path.display()))?;
    let inputs: Vec<NodeInput> =
        serde_json::from_str(&raw).context("nodes file must be a JSON array of nodes")?;
    Ok(inputs.iter().map(NodeInput::sanitize).collect())
}

fn stored_config(s: &db::LlmSettings) -> Result<LlmConfig> {
    LlmConfig::resolve(&s.api_url, &s.api_key, &s.model)
        .context("LLM is not configured, run: sublink init --api-url ... --api-key ...")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let conn = db::open_db(&cli.db).context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn).unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    match cli.command {
        Commands::Init {
            api_url,
            api_key,
            model,
            enable_telemetry,
        } => {
            let settings = db::LlmSettings {
                api_url,
                api_key,
                model,
            };
            db::save_llm_settings(&conn, &settings).context("save settings failed")?;
            db::set_telemetry_enabled(&conn, enable_telemetry).context("save telemetry failed")?;
            telemetry::set_enabled(enable_telemetry);
            println!(
                "Saved LLM settings ({} | {})",
                settings.api_url.trim(),
                if settings.model.trim().is_empty() {
                    "default model"
                } else {
                    settings.model.trim()
                }
            );
        }
        Commands::Test {
            api_url,
            api_key,
            model,
        } => {
            let stored = db::load_llm_settings(&conn).context("load settings failed")?;
            drop(conn);
            let config = LlmConfig::resolve(
                api_url.as_deref().unwrap_or(&stored.api_url),
                api_key.as_deref().unwrap_or(&stored.api_key),
                model.as_deref().unwrap_or(&stored.model),
            )?;
            llm::test_connection(&config)
                .await
                .context("connection test failed")?;
            println!("Connection OK ({} | {})", config.api_url, config.model);
        }
        Commands::Organize {
            nodes,
            instruction,
            validate,
        } => {
            let config = stored_config(
                &db::load_llm_settings(&conn).context("load settings failed")?,
            )?;
            drop(conn);
            let nodes = read_nodes(&nodes)?;
            let result = llm::organize_nodes(&config, &nodes, &instruction)
                .await
                .context("organize nodes failed")?;
            if validate {
                let ids: Vec<i64> = nodes.iter().map(|n| n.id).collect();
                let parsed = reply::parse_organize_reply(&result, &ids)?;
                println!("{}", serde_json::to_string_pretty(&parsed)?);
            } else {
                println!("{}", result);
            }
        }
        Commands::Rules {
            nodes,
            client,
            instruction,
            validate,
        } => {
            let format: ClientFormat = client.parse()?;
            let config = stored_config(
                &db::load_llm_settings(&conn).context("load settings failed")?,
            )?;
            drop(conn);
            let nodes = read_nodes(&nodes)?;
            let result = llm::generate_rules(&config, &nodes, format, &instruction)
                .await
                .context("generate rules failed")?;
            if validate {
                let ids: Vec<i64> = nodes.iter().map(|n| n.id).collect();
                let parsed = reply::parse_rules_reply(&result, &ids)?;
                println!("{}", parsed.rules);
                eprintln!("{}", serde_json::to_string_pretty(&parsed.proxy_groups)?);
            } else {
                println!("{}", result);
            }
        }
        Commands::Serve { addr, demo_mode } => {
            drop(conn);
            server::run(
                &addr,
                AppState {
                    db_path: cli.db,
                    demo_mode,
                },
            )
            .await?;
        }
    }

    Ok(())
}
