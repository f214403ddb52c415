use carbonver_core::{
    AppContext, CollectionState, KvStore, Project, ProjectRepository, SamplingPoint,
};
use serde_json::json;

fn context() -> AppContext {
    AppContext::open_in_memory("cve-platform").unwrap()
}

fn cropland(project_id: &str) -> Project {
    let mut project = Project::new(project_id);
    project.land_use = Some("Cropland".to_string());
    project.area_ha = Some(1250.0);
    project.practices = Some("No-Till".to_string());
    project.project_date = Some("2024-04-01".to_string());
    project.geometry = Some(json!({
        "type": "Feature",
        "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [0, 1], [1, 1], [0, 0]]]}
    }));
    project.baseline_tco2e_yr = Some(1620.0);
    project.sampling_points = Some(vec![SamplingPoint {
        id: "S-01".to_string(),
        lat: Some(34.05),
        lng: Some(-118.25),
        required_reading: Some(1.53),
        ..SamplingPoint::default()
    }]);
    project
}

#[test]
fn fresh_namespace_reads_empty() {
    let ctx = context();
    let repo = ctx.projects();

    assert_eq!(repo.state(), CollectionState::Unloaded);
    assert!(repo.get_all_projects(ctx.user_id()).is_empty());
    assert_eq!(repo.state(), CollectionState::Loaded);
    assert!(repo.get_project("missing", ctx.user_id()).is_none());
}

#[test]
fn save_then_get_returns_saved_fields_and_stamps_timestamps() {
    let ctx = context();
    let repo = ctx.projects();

    let id = repo.save_project(cropland("CVE-CROPLAND-001")).unwrap();
    assert_eq!(id, "CVE-CROPLAND-001");

    let loaded = repo.get_project(&id, ctx.user_id()).unwrap();
    assert_eq!(loaded.project_id, id);
    assert_eq!(loaded.land_use.as_deref(), Some("Cropland"));
    assert_eq!(loaded.area_ha, Some(1250.0));
    assert_eq!(loaded.baseline_tco2e_yr, Some(1620.0));
    assert_eq!(loaded.sampling_points.as_ref().map(Vec::len), Some(1));
    assert!(loaded.updated_at.is_some());
    assert!(loaded.created_at_utc().is_some());
}

#[test]
fn resave_merges_into_one_record() {
    let ctx = context();
    let repo = ctx.projects();
    repo.save_project(cropland("P-1")).unwrap();
    let first = repo.get_project("P-1", ctx.user_id()).unwrap();

    let mut update = Project::new("P-1");
    update.practices = Some("Cover Crops".to_string());
    update.extra.insert("owner".to_string(), json!("coop-7"));
    repo.save_project(update).unwrap();

    let all = repo.get_all_projects(ctx.user_id());
    assert_eq!(all.len(), 1);
    let merged = &all[0];
    assert_eq!(merged.practices.as_deref(), Some("Cover Crops"));
    assert_eq!(merged.land_use.as_deref(), Some("Cropland"));
    assert_eq!(merged.area_ha, Some(1250.0));
    assert_eq!(merged.created_at, first.created_at);
    assert_eq!(merged.extra.get("owner"), Some(&json!("coop-7")));
}

#[test]
fn returned_records_are_copies() {
    let ctx = context();
    let repo = ctx.projects();
    repo.save_project(cropland("P-1")).unwrap();

    let mut copy = repo.get_project("P-1", ctx.user_id()).unwrap();
    copy.area_ha = Some(1.0);

    let stored = repo.get_project("P-1", ctx.user_id()).unwrap();
    assert_eq!(stored.area_ha, Some(1250.0));
}

#[test]
fn delete_removes_every_match_and_tolerates_missing_ids() {
    let ctx = context();
    let repo = ctx.projects();
    repo.save_project(cropland("P-1")).unwrap();
    repo.save_project(cropland("P-2")).unwrap();

    let before = repo.get_all_projects(ctx.user_id());
    assert!(repo.delete_project("nope", ctx.user_id()));
    assert_eq!(repo.get_all_projects(ctx.user_id()), before);

    assert!(repo.delete_project("P-1", ctx.user_id()));
    let ids: Vec<_> = repo
        .get_all_projects(ctx.user_id())
        .into_iter()
        .map(|p| p.project_id)
        .collect();
    assert_eq!(ids, vec!["P-2".to_string()]);
}

#[test]
fn corrupt_blob_reads_empty_and_is_replaced_by_next_save() {
    let ctx = context();
    let key = ctx
        .namespace()
        .collection_key(carbonver_core::CollectionName::Projects, ctx.user_id());
    ctx.kv().set_item(&key, "{{ definitely not json").unwrap();

    let repo = ctx.projects();
    assert!(repo.get_all_projects(ctx.user_id()).is_empty());

    repo.save_project(cropland("P-1")).unwrap();
    assert_eq!(repo.get_all_projects(ctx.user_id()).len(), 1);
}

#[test]
fn foreign_records_survive_merge() {
    let ctx = context();
    let key = ctx
        .namespace()
        .collection_key(carbonver_core::CollectionName::Projects, ctx.user_id());
    ctx.kv()
        .set_item(
            &key,
            r#"[{"projectId":"P-1","landUse":"Grassland","legacyScore":7},"stray"]"#,
        )
        .unwrap();

    let repo = ctx.projects();
    let mut update = Project::new("P-1");
    update.area_ha = Some(40.0);
    repo.save_project(update).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&ctx.kv().get_item(&key).unwrap().unwrap()).unwrap();
    assert_eq!(raw[0]["legacyScore"], json!(7));
    assert_eq!(raw[0]["landUse"], json!("Grassland"));
    assert_eq!(raw[0]["area_ha"], json!(40.0));
    assert_eq!(raw[1], json!("stray"));
}

fn seed_projects(ctx: &AppContext, blob: &str) -> String {
    let key = ctx
        .namespace()
        .collection_key(carbonver_core::CollectionName::Projects, ctx.user_id());
    ctx.kv().set_item(&key, blob).unwrap();
    key
}

fn raw_blob(ctx: &AppContext, key: &str) -> serde_json::Value {
    serde_json::from_str(&ctx.kv().get_item(key).unwrap().unwrap()).unwrap()
}

const LIST_PRACTICES: &str = r#"[{"projectId":"P-1","practices":["No-Till","Cover Crops"]}]"#;

#[test]
fn record_with_mistyped_field_is_readable() {
    let ctx = context();
    seed_projects(&ctx, LIST_PRACTICES);
    let repo = ctx.projects();

    let all = repo.get_all_projects(ctx.user_id());
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].project_id, "P-1");
    assert_eq!(all[0].practices, None);
    assert_eq!(
        all[0].extra.get("practices"),
        Some(&json!(["No-Till", "Cover Crops"]))
    );

    let loaded = repo.get_project("P-1", ctx.user_id()).unwrap();
    assert_eq!(loaded, all[0]);
}

#[test]
fn resave_merges_into_record_with_mistyped_field() {
    let ctx = context();
    let key = seed_projects(&ctx, LIST_PRACTICES);
    let repo = ctx.projects();

    let mut update = Project::new("P-1");
    update.land_use = Some("Cropland".to_string());
    repo.save_project(update).unwrap();

    let raw = raw_blob(&ctx, &key);
    assert_eq!(raw.as_array().map(Vec::len), Some(1));
    assert_eq!(raw[0]["projectId"], json!("P-1"));
    assert_eq!(raw[0]["landUse"], json!("Cropland"));
    assert_eq!(raw[0]["practices"], json!(["No-Till", "Cover Crops"]));

    // A typed value replaces the stored one instead of duplicating the key.
    let mut typed = Project::new("P-1");
    typed.practices = Some("No-Till".to_string());
    repo.save_project(typed).unwrap();
    let raw = raw_blob(&ctx, &key);
    assert_eq!(raw[0]["practices"], json!("No-Till"));
    assert_eq!(repo.get_all_projects(ctx.user_id()).len(), 1);
}

#[test]
fn delete_reaches_record_with_mistyped_field() {
    let ctx = context();
    let key = seed_projects(
        &ctx,
        r#"[{"projectId":"P-1","practices":["No-Till"]},{"projectId":"P-2","area_ha":"wide"}]"#,
    );
    let repo = ctx.projects();

    assert!(repo.delete_project("P-1", ctx.user_id()));

    let raw = raw_blob(&ctx, &key);
    assert_eq!(raw, json!([{"projectId": "P-2", "area_ha": "wide"}]));
    let remaining = repo.get_all_projects(ctx.user_id());
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].area_ha, None);
    assert_eq!(remaining[0].extra.get("area_ha"), Some(&json!("wide")));
}

#[test]
fn namespaces_are_isolated_per_user() {
    let ctx = context();
    let repo = ctx.projects();
    repo.save_project(cropland("P-1")).unwrap();

    assert!(repo.get_all_projects("user-somebody-else").is_empty());
    assert!(repo.get_project("P-1", "user-somebody-else").is_none());
}
