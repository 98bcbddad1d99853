use anyhow::Result;
use fleetbox::cli::{App, EXIT_FAILURE, EXIT_OK};
use fleetbox::domain::traits::StateStore;
use fleetbox::services::{CleanupOptions, STATUS_HISTORY_LENGTH};
use fleetbox::test_support::{MemoryStateStore, MockRuntime};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn app_with(dir: &Path, runtime: Arc<MockRuntime>) -> Result<App> {
    let state = Arc::new(MemoryStateStore::new());
    Ok(App::with_runtime(dir, runtime, state as Arc<dyn StateStore>)?.without_settle())
}

#[test]
fn configuration_errors_are_fatal_at_load() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;

    // forward link
    fs::write(
        temp_dir.path().join("fleetbox.toml"),
        r#"
[[container]]
name = "web"
links = ["db"]

[[container]]
name = "db"
"#,
    )?;
    assert!(app_with(temp_dir.path(), Arc::new(MockRuntime::new())).is_err());

    // duplicate name
    fs::write(
        temp_dir.path().join("fleetbox.toml"),
        r#"
[[container]]
name = "web"

[[container]]
name = "web"
"#,
    )?;
    assert!(app_with(temp_dir.path(), Arc::new(MockRuntime::new())).is_err());
    Ok(())
}

#[test]
fn unknown_selector_names_are_rejected() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    fs::write(
        temp_dir.path().join("fleetbox.toml"),
        "[[container]]\nname = \"web\"\n",
    )?;
    let app = app_with(temp_dir.path(), Arc::new(MockRuntime::new()))?;

    assert!(app.status(&["nope".to_string()], false).is_err());
    Ok(())
}

#[test]
fn monitor_persists_history_and_settles() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    fs::write(
        temp_dir.path().join("fleetbox.toml"),
        "[[container]]\nname = \"web\"\n",
    )?;
    // state dir is normally created by the FsStateStore
    fs::create_dir_all(temp_dir.path().join("state"))?;

    let runtime = Arc::new(MockRuntime::new());
    let state = Arc::new(MemoryStateStore::new());
    let tick = |runtime: &Arc<MockRuntime>, state: &Arc<MemoryStateStore>| -> Result<i32> {
        let app = App::with_runtime(
            temp_dir.path(),
            runtime.clone(),
            state.clone() as Arc<dyn StateStore>,
        )?
        .without_settle();
        app.monitor(&[])
    };

    // no image yet: MISSING. First tick has no settled history, so the
    // failure alerts immediately
    assert_eq!(tick(&runtime, &state)?, EXIT_FAILURE);
    assert!(temp_dir.path().join("state/status_history.json").exists());

    // separate invocations share the window through the file; the
    // failure becomes the settled condition and stops alerting
    for _ in 0..STATUS_HISTORY_LENGTH {
        tick(&runtime, &state)?;
    }
    assert_eq!(tick(&runtime, &state)?, EXIT_OK);

    // recovering the container flips the settled status: change again
    runtime.add_image("web:latest");
    runtime.add_running_instance("web-1", "id-web-1", "web:latest");
    state.record_instance("web", "web-1", "id-web-1")?;
    assert_eq!(tick(&runtime, &state)?, EXIT_FAILURE);
    // and the recovery settles too
    assert_eq!(tick(&runtime, &state)?, EXIT_OK);
    Ok(())
}

#[test]
fn cleanup_simulation_composes_with_container_gc() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    fs::write(
        temp_dir.path().join("fleetbox.toml"),
        "[[container]]\nname = \"web\"\n",
    )?;

    let runtime = Arc::new(MockRuntime::new());
    let old = chrono::Utc::now() - chrono::Duration::days(90);
    let older = chrono::Utc::now() - chrono::Duration::days(120);
    runtime.add_image_full("sha256:leftover", &[], older);
    runtime.add_stopped_instance_from_image_id("web-0", "id-0", "sha256:leftover", older, old);

    let app = app_with(temp_dir.path(), runtime.clone())?;
    app.cleanup(&CleanupOptions {
        simulate: true,
        min_age_days: 31,
    })?;

    // simulation removes nothing for real
    assert!(
        !runtime
            .get_commands()
            .iter()
            .any(|c| c.starts_with("remove_"))
    );

    app.cleanup(&CleanupOptions {
        simulate: false,
        min_age_days: 31,
    })?;
    let commands = runtime.get_commands();
    assert!(commands.contains(&"remove_container:id-0".to_string()));
    assert!(commands.contains(&"remove_image:sha256:leftover".to_string()));
    Ok(())
}
