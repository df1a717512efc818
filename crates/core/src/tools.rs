//! MindBot Tool Service
//!
//! The tools the language model may call while MindBot is active. They are
//! exposed through an MCP tool router so a session can list their schemas and
//! dispatch calls without knowing the concrete persona.

use crate::facts::{self, DEFAULT_TOPIC, IndexSource, ThreadRngSource};
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo, Tool},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

// --- Data Structures for Tools ---

/// Arguments for the `lookup_weather` tool.
///
/// The model fills in the coordinates from its own estimate of the location,
/// so they arrive as free-form strings and are not range-checked.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct LookupWeatherArgs {
    /// The location they are asking for (city or region).
    #[schemars(description = "The location they are asking for (city or region)")]
    pub location: String,
    #[schemars(description = "The latitude of the location, do not ask the user for it")]
    pub latitude: String,
    #[schemars(description = "The longitude of the location, do not ask the user for it")]
    pub longitude: String,
}

/// Arguments for the `get_random_fact` tool.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct GetRandomFactArgs {
    #[serde(default = "default_topic")]
    #[schemars(description = "The topic for the fact: 'general', 'space', 'nature' or 'music'")]
    pub topic: String,
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

/// Placeholder weather report.
///
/// This is a stub: no provider is queried and the coordinates are ignored.
/// Every location gets the same sunny forecast.
pub fn weather_report(location: &str, _latitude: &str, _longitude: &str) -> String {
    format!(
        "Dude, it's looking pretty sunny in {} with a nice 70 degrees. Perfect weather for chilling outside!",
        location
    )
}

// --- Service and Handler Implementation ---

/// Tool server for the MindBot persona.
pub struct MindBotTools {
    fact_source: Arc<dyn IndexSource>,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for MindBotTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

impl Default for MindBotTools {
    fn default() -> Self {
        Self::new(Arc::new(ThreadRngSource))
    }
}

#[tool_router]
impl MindBotTools {
    /// Creates the tool set. `fact_source` decides which fact is returned.
    pub fn new(fact_source: Arc<dyn IndexSource>) -> Self {
        Self {
            fact_source,
            tool_router: Self::tool_router(),
        }
    }

    /// Descriptors (name, description, parameter schema) for every tool.
    pub fn descriptors(&self) -> Vec<Tool> {
        self.tool_router.list_all()
    }

    #[tool(
        description = "Called when the user asks for weather related information. Ensure the user's location (city or region) is provided. When given a location, please estimate the latitude and longitude of the location and do not ask the user for them."
    )]
    pub async fn lookup_weather(
        &self,
        args: Parameters<LookupWeatherArgs>,
    ) -> Result<String, String> {
        let LookupWeatherArgs {
            location,
            latitude,
            longitude,
        } = args.0;
        info!(%location, %latitude, %longitude, "Weather lookup requested");
        Ok(weather_report(&location, &latitude, &longitude))
    }

    #[tool(
        description = "Share a random interesting fact, optionally about a specific topic: general, space, nature or music."
    )]
    pub async fn get_random_fact(
        &self,
        args: Parameters<GetRandomFactArgs>,
    ) -> Result<String, String> {
        info!(topic = %args.0.topic, "Random fact requested");
        Ok(facts::random_fact(&args.0.topic, self.fact_source.as_ref()))
    }
}
