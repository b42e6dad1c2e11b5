use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use contract_desk::{
    config::AppConfig,
    db, init_tracing,
    store::{PgStore, StoreError, TemplateStore},
};

const USAGE: &str = "Usage: maintenance list-templates | maintenance activate <template-id>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    let command = args.next();
    let store = match command.as_deref() {
        Some("list-templates") | Some("activate") => connect().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };

    match command.as_deref() {
        Some("activate") => {
            let id: i64 = args
                .next()
                .context(USAGE)?
                .parse()
                .context("template id must be an integer")?;
            activate(store.as_ref(), id).await
        }
        _ => list_templates(store.as_ref()).await,
    }
}

async fn connect() -> Result<Arc<dyn TemplateStore>> {
    let config = AppConfig::read_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(config.require_database_url()?, 1)?;
    Ok(Arc::new(PgStore::new(pool)))
}

async fn list_templates(store: &dyn TemplateStore) -> Result<()> {
    let templates = store
        .list_templates()
        .await
        .context("failed to load templates")?;
    if templates.is_empty() {
        println!("No templates found.");
        return Ok(());
    }

    for template in &templates {
        let marker = if template.is_active { "*" } else { " " };
        println!(
            "{marker} {:>6}  {}  {}",
            template.id,
            template.created_at.to_rfc3339(),
            template.filename
        );
    }
    Ok(())
}

async fn activate(store: &dyn TemplateStore, id: i64) -> Result<()> {
    match store.activate(id).await {
        Ok(template) => {
            println!("Template {} ({}) is now active.", template.id, template.filename);
            Ok(())
        }
        Err(StoreError::NotFound) => bail!("template {id} does not exist"),
        Err(err) => Err(err).context("failed to activate template"),
    }
}
