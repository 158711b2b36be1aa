use anyhow::Result;
use sheet_grader::utils::logging;
use sheet_grader::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load()?;

    // 初始化日志
    logging::init(config.verbose_logging);

    config.validate()?;

    // 初始化并运行应用
    let stats = App::initialize(config).await?.run().await?;

    if stats.config_errors > 0 {
        anyhow::bail!("存在配置错误，请检查 API 密钥与请求参数");
    }

    Ok(())
}
