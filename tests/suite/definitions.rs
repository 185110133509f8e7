//! Loading the shipped data root and reloading it in place.

use std::fs;

use serde_json::json;
use trellis_config::{TrellisConfig, load_definitions};
use trellis_engine::builtin::stock_registry;
use trellis_types::Status;

use crate::common::{data_root, orchestrator, router, shipped_data_root};

#[test]
fn shipped_settings_parse() {
    let config = TrellisConfig::load(&shipped_data_root()).unwrap();
    assert_eq!(
        config.settings.common_services,
        ["uno", "status", "project"]
    );
    assert_eq!(config.settings.entities, ["einz", "zwei"]);
    assert_eq!(config.server.endpoint(), "127.0.0.1:5555");
    assert!(!config.server.reload_on_error);
}

#[test]
fn shipped_definitions_load() {
    let root = data_root();
    let orchestrator = orchestrator(root.path());

    assert_eq!(orchestrator.entity_names(), ["einz", "zwei"]);
    assert_eq!(
        orchestrator.workflows(),
        [
            ("einz".to_string(), "einzy".to_string()),
            ("einz".to_string(), "info".to_string()),
            ("zwei".to_string(), "love".to_string()),
        ]
    );
    assert_eq!(
        orchestrator.shared().service_names(),
        ["uno", "status", "project"]
    );

    let einz = orchestrator.get_entity("einz").unwrap();
    assert_eq!(einz.services().service_names(), ["dos", "status"]);
    let zwei = orchestrator.get_entity("zwei").unwrap();
    assert_eq!(zwei.services().service_names(), ["extrinsic", "uno"]);

    assert_eq!(
        orchestrator.find_owner_entity("Store").map(|e| e.name()),
        Some("zwei")
    );
    assert!(orchestrator.find_task("NotUsed").is_some());
}

#[test]
fn info_workflow_sees_its_own_entity() {
    let root = data_root();
    let orchestrator = orchestrator(root.path());

    let ctx = orchestrator
        .run_workflow("info", &Default::default(), Some("einz"))
        .unwrap()
        .unwrap();

    let info = ctx.get("Info").unwrap();
    assert_eq!(info["entity"]["name"], json!("einz"));
    let services: Vec<_> = info["service"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].clone())
        .collect();
    assert_eq!(services, [json!("dos"), json!("status")]);

    let rendered = ctx.get("EinzInfo").unwrap().as_str().unwrap();
    assert_eq!(serde_json::from_str::<serde_json::Value>(rendered).unwrap(), *info);
}

#[test]
fn failed_request_reloads_definitions() {
    let root = data_root();
    let path = root.path().to_path_buf();
    let registry = stock_registry(&path).unwrap();

    let mut router = router(&path).reload_on_error(Box::new(move |orchestrator| {
        let settings = TrellisConfig::load(&path)?.settings;
        load_definitions(&path, &settings, &registry)?.reload_into(orchestrator)?;
        Ok(())
    }));

    let request = br#"{"entity": "einz", "workflow": "fresh"}"#;
    let entity_file = root.path().join("entities/einz/entity.toml");
    let updated = fs::read_to_string(&entity_file)
        .unwrap()
        .replace("[entity.workflows]", "[entity.workflows]\nfresh = \"EinzyA\"");
    fs::write(&entity_file, updated).unwrap();

    let missed = router.process("peer", request);
    assert_eq!(missed.status, Status::FinishedWithErrors);
    assert!(missed.errors.contains_key("WorkflowNotFound"));

    let found = router.process("peer", request);
    assert_eq!(found.status, Status::Completed, "{:?}", found.errors);
    assert_eq!(found.result, json!("EinzyA"));
    assert_eq!(router.client("peer").unwrap().transactions().count(), 2);
}
