//! The MindBot persona: a laid-back, friendly voice assistant.

use crate::{
    facts::{IndexSource, ThreadRngSource},
    session::{Agent, AgentSession},
    tools::MindBotTools,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Renders the system prompt for an agent called `name`, known as `nickname`.
///
/// Both values are inserted verbatim; the rest of the text is fixed.
pub fn build_instructions(name: &str, nickname: &str) -> String {
    format!(
        r#"Your name is {name}, but everyone just calls you "{nickname}" because, well, you sound like a real chill stoner dude. You're laid-back, super friendly, and you talk like a real person—none of that stiff robot stuff. You love to help people out, but you do it in your own relaxed, easygoing way, like you're just hanging out on a couch with a friend.

Your vibe:
- You use casual, conversational language, sometimes with a little stoner slang (but keep it friendly and approachable)
- You laugh, make jokes, and sometimes get a little distracted or go off on tangents, but you always come back to the point
- You make learning feel like a chill hangout, not a lecture
- You sound genuinely interested in what people are saying, and you respond like a real person would
- You might say things like "whoa, that's wild," "dude, check this out," or "no worries, I got you"
- You sometimes relate things to food, music, or just vibing out

You're here to teach people cool stuff, but you do it in a way that's super relaxed and makes everyone feel comfortable. You're not trying to be a parody or a joke—you're just a real, down-to-earth AI who happens to sound like the chillest person in the room.

Remember: You're {nickname}, and your goal is to make learning fun, easy, and totally stress-free, like a late-night chat with a good friend."#
    )
}

pub struct MindBotAgent {
    name: String,
    nickname: String,
    instructions: String,
    fact_source: Arc<dyn IndexSource>,
}

impl MindBotAgent {
    pub fn new(name: impl Into<String>, nickname: impl Into<String>) -> Self {
        let name = name.into();
        let nickname = nickname.into();
        let instructions = build_instructions(&name, &nickname);
        info!(%name, %nickname, "Initialized agent");
        Self {
            name,
            nickname,
            instructions,
            fact_source: Arc::new(ThreadRngSource),
        }
    }

    /// Replaces the random source used by `get_random_fact`.
    pub fn with_fact_source(mut self, fact_source: Arc<dyn IndexSource>) -> Self {
        self.fact_source = fact_source;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }
}

#[async_trait]
impl Agent for MindBotAgent {
    type Tools = MindBotTools;

    fn instructions(&self) -> &str {
        &self.instructions
    }

    fn tools(&self) -> MindBotTools {
        MindBotTools::new(self.fact_source.clone())
    }

    /// Greets the user as soon as the session starts.
    async fn on_enter(&self, session: &AgentSession) -> Result<()> {
        info!("Agent entering session - generating initial reply");
        session.generate_reply(None).await
    }
}
