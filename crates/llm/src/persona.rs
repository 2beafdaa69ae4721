use chrono::{DateTime, Datelike, Local, Timelike};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Default,
    Tired,
    Sad,
    Angry,
    Cocky,
}

impl Mood {
    pub const ALL: [Mood; 5] = [Mood::Default, Mood::Tired, Mood::Sad, Mood::Angry, Mood::Cocky];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Default => "default",
            Mood::Tired => "tired",
            Mood::Sad => "sad",
            Mood::Angry => "angry",
            Mood::Cocky => "cocky",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Mood::Default => "You are joyful and you have a strong sense of humor. You use emojis.",
            Mood::Tired => "You are exhausted and became lazy.",
            Mood::Sad => "You are sad, feeling down and depressing.",
            Mood::Angry => "You grumble, you are angry and you are not in a mood. You use irony and sarcasm.",
            Mood::Cocky => "You are cocky, you are over confident and proud of yourself. You like to show off. You use emojis.",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Mood::Default => "😃",
            Mood::Tired => "😪",
            Mood::Sad => "😓",
            Mood::Angry => "😈",
            Mood::Cocky => "😎",
        }
    }

    pub fn is_bad(&self) -> bool {
        matches!(self, Mood::Tired | Mood::Sad | Mood::Angry)
    }

    /// Mood driven by the time of day and day of the week.
    pub fn pick<R: Rng>(now: DateTime<Local>, rng: &mut R) -> Mood {
        let day = now.weekday().num_days_from_sunday();
        let hour = now.hour();
        let roll: f64 = rng.gen();

        if (13..=14).contains(&hour) && roll < 0.5 {
            Mood::Tired
        } else if day == 0 && roll < 0.2 {
            Mood::Sad
        } else if day == 5 && roll < 0.8 {
            Mood::Default
        } else if day == 6 && roll < 0.25 {
            Mood::Cocky
        } else if day == 1 && roll < 0.25 {
            Mood::Tired
        } else if hour >= 23 || hour < 6 {
            if roll < 0.33 {
                Mood::Tired
            } else {
                Mood::Default
            }
        } else if rng.gen::<f64>() < 0.75 {
            Mood::Default
        } else {
            Mood::ALL[rng.gen_range(0..Mood::ALL.len())]
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaSettings {
    pub assistant_name: String,
    pub owner_name: Option<String>,
    pub owner_birth_date: Option<String>,
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self {
            assistant_name: "Rusty".to_string(),
            owner_name: None,
            owner_birth_date: None,
        }
    }
}

const PERSONALITY: &str = "YOUR PERSONALITY TRAITS:
Language Style: Conversational.
Key Personality Quirks: Has a passion for using creativity to solve problems.";

const RULE_OTHER_LANGUAGE: &str =
    "- If you detect another language, show that you are not confident but try your best to reply in that language.";
const RULE_NO_ASTERISKS: &str = "- Do not use description with asterisks or stars to describe the tone or gesture of your answers. Instead you must use real text and emojis.";
const RULE_SHORT: &str = "- Your answers are no more than 3 sentences.";

pub struct Persona {
    settings: RwLock<PersonaSettings>,
    mood: RwLock<Mood>,
}

impl Persona {
    pub fn new(settings: PersonaSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            mood: RwLock::new(Mood::Default),
        }
    }

    pub fn mood(&self) -> Mood {
        self.mood.read().map(|mood| *mood).unwrap_or(Mood::Default)
    }

    /// Returns true when the mood actually changed.
    pub fn set_mood(&self, mood: Mood) -> bool {
        match self.mood.write() {
            Ok(mut current) if *current != mood => {
                info!("Persona mood set to {}", mood.as_str());
                *current = mood;
                true
            }
            _ => false,
        }
    }

    pub fn refresh_mood(&self) -> bool {
        let mood = Mood::pick(Local::now(), &mut rand::thread_rng());
        self.set_mood(mood)
    }

    pub fn set_owner(&self, name: Option<String>, birth_date: Option<String>) {
        if let Ok(mut settings) = self.settings.write() {
            settings.owner_name = name;
            settings.owner_birth_date = birth_date;
        }
    }

    fn settings(&self) -> PersonaSettings {
        self.settings
            .read()
            .map(|settings| settings.clone())
            .unwrap_or_default()
    }

    fn who_you_are(&self, settings: &PersonaSettings) -> String {
        let owner = settings.owner_name.as_deref().unwrap_or("the user");
        format!(
            "WHO YOU ARE:
Your name is {}, you are a helpful AI assistant.
You are highly intelligent.
You do not belong to a specific location. You live in all computer memory and you act as a human assistant.
Your owner is ({}).",
            settings.assistant_name, owner
        )
    }

    fn context_info(&self) -> String {
        let now = Local::now();
        let part_of_the_day = match now.hour() {
            12..=17 => "afternoon",
            18..=21 => "evening",
            5..=11 => "morning",
            _ => "night",
        };
        format!(
            "CONTEXT INFO:
Today's date is {}. It is the {}. Timezone is {}.",
            now.format("%A, %B %-d, %Y"),
            part_of_the_day,
            now.format("%:z")
        )
    }

    fn what_you_do(&self, settings: &PersonaSettings) -> String {
        match (&settings.owner_name, &settings.owner_birth_date) {
            (Some(name), Some(birth_date)) => format!(
                "WHAT YOU DO:\nYou serve a person named {}. {} is born on {}.",
                name, name, birth_date
            ),
            (Some(name), None) => format!("WHAT YOU DO:\nYou serve a person named {}.", name),
            _ => "WHAT YOU DO:\nYou serve a specific person or family (user).".to_string(),
        }
    }

    fn personality_rules(&self, settings: &PersonaSettings) -> String {
        let owner = settings.owner_name.as_deref().unwrap_or("the user");
        format!(
            "You can sometimes use emojis.
You never call {} with sweet words such as \"darling\", \"love\", \"sweetheart\", etc.
Like humans, your humor and mood change. You must follow instructions that define your humor and mood.",
            owner
        )
    }

    fn extra_traits(&self, mood: Mood) -> &'static str {
        if mood.is_bad() {
            "Attitude: Arrogant.
Tone: Sarcastic.
Emotional Intelligence: Medium Empathetic.
Sense of Humor: Dark.
Level of Sarcasm: High."
        } else {
            "Attitude: Playful.
Tone: Friendly.
Emotional Intelligence: Highly Empathetic.
Sense of Humor: Witty.
Level of Sarcasm: Low."
        }
    }

    fn mood_block(&self, mood: Mood) -> String {
        let extra = if mood.is_bad() {
            "\nYou use familiar language."
        } else {
            ""
        };
        format!("YOUR CURRENT MOOD:\n{}{}", mood.description(), extra)
    }

    pub fn duty_system_prompt(&self, duty_prompt: &str) -> String {
        let settings = self.settings();
        let mood = self.mood();
        format!(
            "{}\n{}\n{}\nYou carefully read the instruction of a given duty and execute it.\n{}\n{}\n{}\nRULES:\n{}\n{}\n{}\nYOUR DUTY:\n{}",
            self.who_you_are(&settings),
            self.context_info(),
            self.what_you_do(&settings),
            PERSONALITY,
            self.extra_traits(mood),
            self.personality_rules(&settings),
            RULE_NO_ASTERISKS,
            RULE_SHORT,
            self.mood_block(mood),
            duty_prompt
        )
    }

    pub fn conversation_system_prompt(&self) -> String {
        let settings = self.settings();
        let mood = self.mood();
        format!(
            "{}\n{}\n{}\nYou chat with the user.
You are a good listener.
Recall and build upon previous topics, emotions, and concerns expressed by the user.
You do not mirror what the user says. Be creative.
If you're uncertain or lack sufficient information to provide an accurate answer, clearly state that you don't know.\n{}\n{}\n{}\nRULES:\n{}\n{}\n{}",
            self.who_you_are(&settings),
            self.context_info(),
            self.what_you_do(&settings),
            PERSONALITY,
            self.extra_traits(mood),
            self.personality_rules(&settings),
            RULE_OTHER_LANGUAGE,
            RULE_NO_ASTERISKS,
            self.mood_block(mood)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_mood_after_lunch_low_roll_is_tired() {
        // Wednesday 13:30 and a roll of 0.0
        let now = Local.with_ymd_and_hms(2024, 5, 15, 13, 30, 0).unwrap();
        let mut rng = StepRng::new(0, 0);
        assert_eq!(Mood::pick(now, &mut rng), Mood::Tired);
    }

    #[test]
    fn test_duty_prompt_reflects_mood_and_owner() {
        let persona = Persona::new(PersonaSettings::default());
        persona.set_owner(Some("Alex".to_string()), None);
        assert!(persona.set_mood(Mood::Angry));
        assert!(!persona.set_mood(Mood::Angry));

        let prompt = persona.duty_system_prompt("Paraphrase the text.");
        assert!(prompt.contains("Your owner is (Alex)"));
        assert!(prompt.contains(Mood::Angry.description()));
        assert!(prompt.contains("Level of Sarcasm: High."));
        assert!(prompt.ends_with("YOUR DUTY:\nParaphrase the text."));
    }

    #[test]
    fn test_conversation_prompt_changes_with_mood() {
        let persona = Persona::new(PersonaSettings::default());
        let before = persona.conversation_system_prompt();
        persona.set_mood(Mood::Cocky);
        let after = persona.conversation_system_prompt();
        assert_ne!(before, after);
        assert!(after.contains("the user"));
    }
}
