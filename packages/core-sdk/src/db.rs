use anyhow::Result;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{path::Path, thread, time::Duration};

pub const KEY_API_URL: &str = "llm_api_url";
pub const KEY_API_KEY: &str = "llm_api_key";
pub const KEY_MODEL: &str = "llm_model";
const KEY_TELEMETRY: &str = "telemetry_enabled";

/** \brief 未指定时使用的数据库文件。 */
pub const DEFAULT_DB_PATH: &str = "sublink.db";

/**
 * \brief 设置中保存的 LLM 原始配置，未校验。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LlmSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

/**
 * \brief 打开数据库文件。
 */
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建必要表结构。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

/**
 * \brief 按键读取设置，不存在时返回空字符串。
 */
pub fn get_setting(conn: &Connection, key: &str) -> Result<String> {
    let val = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val.unwrap_or_default())
}

/**
 * \brief 写入设置（存在则覆盖）。
 */
pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

/**
 * \brief 读取 LLM 设置三元组。
 */
pub fn load_llm_settings(conn: &Connection) -> Result<LlmSettings> {
    Ok(LlmSettings {
        api_url: get_setting(conn, KEY_API_URL)?,
        api_key: get_setting(conn, KEY_API_KEY)?,
        model: get_setting(conn, KEY_MODEL)?,
    })
}

/**
 * \brief 保存 LLM 设置；api_key 为空时保留已存储的密钥。
 */
pub fn save_llm_settings(conn: &Connection, settings: &LlmSettings) -> Result<()> {
    set_setting(conn, KEY_API_URL, settings.api_url.trim())?;
    set_setting(conn, KEY_MODEL, settings.model.trim())?;
    let key = settings.api_key.trim();
    if !key.is_empty() {
        set_setting(conn, KEY_API_KEY, key)?;
    }
    Ok(())
}

/**
 * \brief 读取遥测开关。
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    Ok(get_setting(conn, KEY_TELEMETRY)? == "1")
}

/**
 * \brief 更新遥测开关。
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_setting(conn, KEY_TELEMETRY, if enabled { "1" } else { "0" })
}

fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
