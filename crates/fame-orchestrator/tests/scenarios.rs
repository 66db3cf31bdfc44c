//! End-to-end scenarios driven against `MemoryStore`/`MemoryQueue`,
//! simulating what a worker does after running a module (move to
//! executed, report success, call `resume`) without any real module
//! execution.

use fame_core::{AnalysisStatus, File, ModuleInfo, ModuleType};
use fame_dispatcher::ModuleCatalog;
use fame_orchestrator::engine::Engine;
use fame_store::{MemoryQueue, MemoryStore, Store};
use std::collections::HashSet;
use std::sync::Arc;

fn module(name: &str, acts_on: &[&str], generates: &[&str]) -> ModuleInfo {
    ModuleInfo {
        name: name.to_string(),
        acts_on: acts_on.iter().map(|s| s.to_string()).collect(),
        generates: generates.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn engine(modules: Vec<ModuleInfo>) -> Engine<MemoryStore, MemoryQueue> {
    let catalog = Arc::new(ModuleCatalog::build(modules));
    Engine::new(Arc::new(MemoryStore::new()), Arc::new(MemoryQueue::new()), catalog)
}

/// Scenario 1: one general-purpose module runs once, analysis finishes.
#[tokio::test]
async fn scenario_one_general_purpose_module_runs_to_completion() {
    let e = engine(vec![module("E", &["executable"], &[])]);
    let mut file = File::new("executable");
    file.sha256 = Some("aaaa".into());
    e.store.put_file(&file).await.unwrap();

    let id = e
        .start_analysis(&file, "alice", HashSet::new(), vec![])
        .await
        .unwrap();

    let a = e.store.get_analysis(id).await.unwrap().unwrap();
    assert_eq!(a.pending_modules, vec!["E".to_string()]);

    e.store.with_analysis(id, |a| a.move_to_executed("E")).await.unwrap();
    e.on_module_success(id, "E", &[]).await.unwrap();
    e.resume(id, "executable").await.unwrap();

    let a = e.store.get_analysis(id).await.unwrap().unwrap();
    assert_eq!(a.status, AnalysisStatus::Finished);
    assert_eq!(a.executed_modules, vec!["E".to_string()]);
    assert!(a.tags.contains(&"E".to_string()));
}

/// Scenario 2: `Static` waits on `executable`; `Unzip` runs first and
/// generates it, unblocking `Static`.
#[tokio::test]
async fn scenario_two_transform_unblocks_waiting_module() {
    let e = engine(vec![
        module("Static", &["executable"], &[]),
        module("Unzip", &["zip"], &["executable"]),
    ]);
    let mut file = File::new("zip");
    file.sha256 = Some("bbbb".into());
    e.store.put_file(&file).await.unwrap();

    let id = e
        .start_analysis(&file, "alice", HashSet::new(), vec!["Static".to_string()])
        .await
        .unwrap();

    let a = e.store.get_analysis(id).await.unwrap().unwrap();
    assert_eq!(a.pending_modules, vec!["Unzip".to_string()]);
    assert_eq!(a.waiting_modules, vec!["Static".to_string()]);

    e.store.with_analysis(id, |a| a.move_to_executed("Unzip")).await.unwrap();
    e.on_module_success(id, "Unzip", &[]).await.unwrap();
    e.add_generated_files(id, "executable", vec!["/tmp/extracted.exe".to_string()])
        .await
        .unwrap();
    e.resume(id, "zip").await.unwrap();

    let a = e.store.get_analysis(id).await.unwrap().unwrap();
    assert_eq!(a.pending_modules, vec!["Static".to_string()]);
    assert!(a.waiting_modules.is_empty());

    e.store.with_analysis(id, |a| a.move_to_executed("Static")).await.unwrap();
    e.on_module_success(id, "Static", &[]).await.unwrap();
    e.resume(id, "zip").await.unwrap();

    let a = e.store.get_analysis(id).await.unwrap().unwrap();
    assert_eq!(a.status, AnalysisStatus::Finished);
    assert_eq!(a.executed_modules, vec!["Unzip".to_string(), "Static".to_string()]);
}

/// Scenario 4: `TargetX` has no execution path and is canceled; the
/// analysis still finishes.
#[tokio::test]
async fn scenario_four_unreachable_target_is_canceled() {
    let e = engine(vec![module("TargetX", &["javascript"], &[])]);
    let mut file = File::new("pdf");
    file.sha256 = Some("cccc".into());
    e.store.put_file(&file).await.unwrap();

    let id = e
        .start_analysis(&file, "alice", HashSet::new(), vec!["TargetX".to_string()])
        .await
        .unwrap();

    let a = e.store.get_analysis(id).await.unwrap().unwrap();
    assert_eq!(a.status, AnalysisStatus::Finished);
    assert_eq!(a.canceled_modules, vec!["TargetX".to_string()]);
    assert!(a.logs.iter().any(|l| l.message.contains("no execution path")));
}

/// Scenario 6: `M` declares tag `ransomware`; `Report` is triggered by it
/// and runs after `M`.
#[tokio::test]
async fn scenario_six_tag_trigger_enqueues_report() {
    let mut report = module("Report", &[], &[]);
    report.module_type = ModuleType::Reporting;
    report.triggered_by = vec!["ransomware".to_string()];
    let e = engine(vec![module("M", &[], &[]), report]);

    let mut file = File::new("executable");
    file.sha256 = Some("dddd".into());
    e.store.put_file(&file).await.unwrap();

    let id = e
        .start_analysis(&file, "alice", HashSet::new(), vec!["M".to_string()])
        .await
        .unwrap();

    e.store.with_analysis(id, |a| a.move_to_executed("M")).await.unwrap();
    e.on_module_success(id, "M", &["ransomware".to_string()]).await.unwrap();

    let a = e.store.get_analysis(id).await.unwrap().unwrap();
    assert!(a.tags.contains(&"M".to_string()));
    assert!(a.tags.contains(&"ransomware".to_string()));
    assert!(a.tags.contains(&"M(ransomware)".to_string()));
    assert_eq!(a.pending_modules, vec!["Report".to_string()]);

    e.store.with_analysis(id, |a| a.move_to_executed("Report")).await.unwrap();
    e.on_module_success(id, "Report", &[]).await.unwrap();
    e.resume(id, "executable").await.unwrap();

    let a = e.store.get_analysis(id).await.unwrap().unwrap();
    assert_eq!(a.status, AnalysisStatus::Finished);
    assert!(a.executed_modules.contains(&"Report".to_string()));
}
