//! Native timer skill: `set_timer`, `check_timer` and `cancel_timer`.
//!
//! Invoked with the path of a JSON request file; writes one answer envelope
//! on stdout. Timers live in `$SKILL_MEMORY_DIR/timers.json`.

use anyhow::{anyhow, bail, Context, Result};
use rand::seq::SliceRandom;
use rusty_dialogue_common::{
    Answer, NerEntity, SkillConfig, SkillCoreData, SkillExecutionRequest, SkillOutput,
    SkillOutputEnvelope,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MEMORY_FILE: &str = "timers.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Timer {
    widget_id: String,
    /// Seconds
    duration: i64,
    created_at: i64,
    finished_at: i64,
}

impl Timer {
    fn remaining(&self, now: i64) -> i64 {
        (self.finished_at - now).max(0)
    }
}

struct Memory {
    path: PathBuf,
}

impl Memory {
    fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(MEMORY_FILE),
        }
    }

    fn load(&self) -> Result<Vec<Timer>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).context("corrupted timer memory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, timers: &[Timer]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(timers)?)?;
        Ok(())
    }
}

struct Answers {
    answers: BTreeMap<String, Vec<String>>,
}

impl Answers {
    fn load(skill_dir: &Path, lang: &str) -> Result<Self> {
        let path = skill_dir.join("config").join(format!("{}.json", lang));
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("missing skill config {}", path.display()))?;
        let config: SkillConfig = serde_json::from_str(&content)?;
        Ok(Self {
            answers: config.answers,
        })
    }

    fn pick(&self, key: &str, data: &[(&str, String)]) -> String {
        let template = self
            .answers
            .get(key)
            .and_then(|phrases| phrases.choose(&mut rand::thread_rng()))
            .cloned()
            .unwrap_or_else(|| key.to_string());

        data.iter().fold(template, |answer, (name, value)| {
            answer.replace(&format!("%{}%", name), value)
        })
    }
}

fn main() -> Result<()> {
    let request_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: timer-skill <request.json>"))?;
    let request: SkillExecutionRequest = serde_json::from_str(
        &std::fs::read_to_string(&request_path).with_context(|| format!("cannot read {}", request_path))?,
    )?;

    let skill_dir = std::env::var("SKILL_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."));
    let memory_dir = std::env::var("SKILL_MEMORY_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| skill_dir.join("memory"));

    let answers = Answers::load(&skill_dir, &request.lang)?;
    let memory = Memory::new(&memory_dir);
    let now = chrono::Utc::now().timestamp();

    println!("timer-skill: running {}", request.action);
    let output = match request.action.as_str() {
        "set_timer" => set_timer(&request, &answers, &memory, now)?,
        "check_timer" => check_timer(&request, &answers, &memory, now)?,
        "cancel_timer" => cancel_timer(&answers, &memory)?,
        other => bail!("unknown action {}", other),
    };

    println!("{}", serde_json::to_string(&SkillOutputEnvelope { output })?);
    Ok(())
}

/// Seconds from a duration entity; `None` for an unsupported unit.
fn duration_in_seconds(entity: &NerEntity) -> Option<i64> {
    if let Some(seconds) = entity.resolution.get("seconds").and_then(|v| v.as_i64()) {
        return Some(seconds);
    }

    let value = entity.resolution.pointer("/values/0")?;
    let amount = value.get("value")?.as_f64()?;
    let factor = match value.get("unit")?.as_str()? {
        "second" => 1.0,
        "minute" => 60.0,
        "hour" => 3_600.0,
        _ => return None,
    };
    Some((amount * factor).round() as i64)
}

fn humanize(seconds: i64) -> String {
    let (hours, minutes, seconds) = (seconds / 3_600, (seconds % 3_600) / 60, seconds % 60);
    let mut parts = Vec::new();
    for (amount, unit) in [(hours, "hour"), (minutes, "minute"), (seconds, "second")] {
        if amount > 0 {
            parts.push(format!("{} {}{}", amount, unit, if amount > 1 { "s" } else { "" }));
        }
    }
    if parts.is_empty() {
        return "0 seconds".to_string();
    }
    parts.join(" ")
}

fn timer_widget(timer: &Timer, now: i64) -> serde_json::Value {
    serde_json::json!({
        "component": "TimerWidget",
        "id": timer.widget_id,
        "props": {
            "initialDuration": timer.duration,
            "initialTime": timer.remaining(now),
            "interval": 1000,
            "totalTimeContent": humanize(timer.duration),
        }
    })
}

fn answer(text: String) -> Option<Answer> {
    Some(Answer::Text(text))
}

fn set_timer(request: &SkillExecutionRequest, answers: &Answers, memory: &Memory, now: i64) -> Result<SkillOutput> {
    let Some(entity) = request
        .current_entities
        .iter()
        .chain(request.entities.iter())
        .find(|entity| entity.entity == "duration")
    else {
        return Ok(SkillOutput {
            answer: answer(answers.pick("cannot_get_duration", &[])),
            ..SkillOutput::default()
        });
    };

    let Some(duration) = duration_in_seconds(entity).filter(|seconds| *seconds > 0) else {
        return Ok(SkillOutput {
            answer: answer(answers.pick("unit_not_supported", &[])),
            ..SkillOutput::default()
        });
    };

    let timer = Timer {
        widget_id: format!("timer-{}", uuid::Uuid::new_v4().simple()),
        duration,
        created_at: now,
        finished_at: now + duration,
    };
    let mut timers = memory.load()?;
    timers.push(timer.clone());
    memory.save(&timers)?;

    Ok(SkillOutput {
        answer: answer(answers.pick("timer_set", &[("duration", humanize(duration))])),
        widget: Some(timer_widget(&timer, now)),
        core: Some(SkillCoreData::default()),
    })
}

fn check_timer(request: &SkillExecutionRequest, answers: &Answers, memory: &Memory, now: i64) -> Result<SkillOutput> {
    let timers = memory.load()?;
    let widget_id = request
        .current_entities
        .iter()
        .chain(request.entities.iter())
        .find(|entity| entity.entity == "widgetid")
        .and_then(|entity| entity.option.clone().or_else(|| Some(entity.source_text.clone())));

    let timer = match &widget_id {
        Some(id) => timers.iter().find(|timer| &timer.widget_id == id),
        None => timers.iter().max_by_key(|timer| timer.created_at),
    };

    let Some(timer) = timer.filter(|timer| widget_id.is_some() || timer.remaining(now) > 0) else {
        return Ok(SkillOutput {
            answer: answer(answers.pick("no_timer_set", &[])),
            ..SkillOutput::default()
        });
    };

    let remaining = timer.remaining(now);
    Ok(SkillOutput {
        answer: answer(answers.pick("timer_remaining_time", &[("remaining_time", humanize(remaining))])),
        widget: Some(timer_widget(timer, now)),
        core: None,
    })
}

fn cancel_timer(answers: &Answers, memory: &Memory) -> Result<SkillOutput> {
    let timers = memory.load()?;
    let key = if timers.is_empty() {
        "no_timer_to_cancel"
    } else {
        memory.save(&[])?;
        "timer_canceled"
    };

    Ok(SkillOutput {
        answer: answer(answers.pick(key, &[])),
        ..SkillOutput::default()
    })
}
