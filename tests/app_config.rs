#[path = "common/mod.rs"]
mod common;

use brokergate::{build_state_from_env, AppConfig, CatalogSource};
use common::EnvGuard;
use once_cell::sync::Lazy;
use std::sync::Mutex;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[test]
fn rejects_invalid_boolean_env_values() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut env = EnvGuard::new();
    env.set("BROKER_ASYNC_UPDATES", "maybe");
    let err = AppConfig::from_env().expect_err("expected invalid boolean to error");
    assert!(format!("{}", err).contains("BROKER_ASYNC_UPDATES"));
}

#[test]
fn catalog_file_selects_static_source() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut env = EnvGuard::new();
    env.remove("BROKER_CATALOG_URL");
    env.set("BROKER_CATALOG_FILE", "/etc/broker/catalog.json");
    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(
        cfg.catalog,
        CatalogSource::Static {
            path: Some("/etc/broker/catalog.json".into())
        }
    );
}

#[tokio::test]
async fn missing_catalog_file_fails_startup() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut env = EnvGuard::new();
    env.remove("BROKER_CATALOG_URL");
    env.remove("BROKER_ASYNC_UPDATES");
    env.set("BROKER_CATALOG_FILE", "/definitely/not/here/catalog.json");
    let err = match build_state_from_env().await {
        Ok(_) => panic!("startup should fail without a readable catalog"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("BROKER_CATALOG_FILE"));
}
