//! PostgreSQL adapter for the ISSN identity graph.
//!
//! [`PgIdentityStore`] implements every store port of `issnl_core`; the
//! schema ships as embedded migrations under `migrations/`.

pub mod store;

pub use store::PgIdentityStore;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Hide the password component of a connection string for logging.
pub fn mask_database_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut masked = parsed.clone();
        if parsed.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else if url.len() > 20 {
        format!("{}***{}", &url[..10], &url[url.len() - 10..])
    } else {
        "***".to_string()
    }
}
