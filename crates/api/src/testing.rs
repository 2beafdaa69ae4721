use crate::{AppState, WebSocketManager};
use rusty_dialogue_core::{AssistantCore, Settings};
use std::path::Path;
use std::sync::Arc;

/// Language data and one dialog skill (`social.greeting.hello`) under `dir`.
fn write_fixtures(dir: &Path) {
    let lang_dir = dir.join("lang");
    std::fs::create_dir_all(&lang_dir).unwrap();
    std::fs::write(
        lang_dir.join("en.json"),
        serde_json::json!({
            "min_confidence": 0.5,
            "action_loop_stop_words": ["stop"],
            "fallbacks": [
                { "words": ["hello"], "domain": "social", "skill": "greeting", "action": "hello" }
            ],
            "answers": {
                "random_unknown_intents": ["Pardon?"],
                "random_skill_errors": ["%skill_name% failed."]
            }
        })
        .to_string(),
    )
    .unwrap();

    let greeting = dir.join("skills/social/greeting");
    std::fs::create_dir_all(greeting.join("config")).unwrap();
    std::fs::write(dir.join("skills/social/domain.json"), r#"{"name":"Social"}"#).unwrap();
    std::fs::write(greeting.join("skill.json"), r#"{"name":"Greeting","bridge":"python"}"#).unwrap();
    std::fs::write(
        greeting.join("config/en.json"),
        r#"{"actions":{"hello":{"type":"dialog","answers":["Hello from the greeting skill."]}}}"#,
    )
    .unwrap();
}

pub(crate) async fn app_state(dir: &tempfile::TempDir) -> AppState {
    app_state_with(dir, |_| {}).await
}

pub(crate) async fn app_state_with(dir: &tempfile::TempDir, configure: impl FnOnce(&mut Settings)) -> AppState {
    write_fixtures(dir.path());

    let mut settings = Settings::default();
    settings.paths.lang_dir = dir.path().join("lang");
    settings.paths.skills_dir = dir.path().join("skills");
    settings.paths.logs_dir = dir.path().join("logs");
    settings.paths.tmp_dir = dir.path().join("tmp");
    settings.paths.memory_dir = dir.path().join("memory");
    configure(&mut settings);

    let websocket = Arc::new(WebSocketManager::new());
    let core = AssistantCore::new(settings, websocket.clone()).await.unwrap();
    core.initialize().await.unwrap();
    AppState::new(Arc::new(core), websocket)
}
