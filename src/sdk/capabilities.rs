//! The vehicle configurator capability table.
//!
//! Handlers never touch UI state directly. Each one validates its arguments,
//! publishes a [`ConfiguratorEvent`] on the injected [`ConfiguratorBus`] and returns a
//! JSON result for the remote model.

use super::tools::{ToolRegistry, failure_output};
use crate::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use tokio::sync::broadcast;

pub const CHANGE_VEHICLE_COLOR: &str = "changeVehicleColor";
pub const CHANGE_INTERIOR_COLOR: &str = "changeInteriorColor";
pub const SELECT_VEHICLE_MODEL: &str = "selectVehicleModel";
pub const NAVIGATE_TO: &str = "navigateTo";
pub const CHANGE_TAB: &str = "changeTab";
pub const SAVE_PHONE_NUMBER: &str = "savePhoneNumber";

const DEFAULT_BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ExteriorColor {
    #[serde(rename = "Alpine White")]
    AlpineWhite,
    #[serde(rename = "Black Sapphire Metallic")]
    BlackSapphireMetallic,
    #[serde(rename = "Dark Graphite Metallic")]
    DarkGraphiteMetallic,
    #[serde(rename = "Mineral White Metallic")]
    MineralWhiteMetallic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Upholstery {
    Oyster,
    Mocha,
    Black,
    #[serde(rename = "Stonegray Microfiber/Wool Blend")]
    StonegrayMicrofiberWoolBlend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VehicleModel {
    Xdrive50,
    M60,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    Exterior,
    Interior,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChangeVehicleColorArgs {
    pub color: ExteriorColor,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChangeInteriorColorArgs {
    pub upholstery: Upholstery,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectVehicleModelArgs {
    pub model_id: VehicleModel,
}

#[derive(Debug, Deserialize)]
pub struct NavigateToArgs {
    pub id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChangeTabArgs {
    pub tab: Tab,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SavePhoneNumberArgs {
    /// The customer's phone number.
    pub phone_number: String,
}

/// Local state changes requested by the remote model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfiguratorEvent {
    ExteriorColorChanged(ExteriorColor),
    InteriorChanged(Upholstery),
    ModelSelected(VehicleModel),
    Navigate { id: String, path: String },
    TabChanged(Tab),
    PhoneNumberSaved(String),
}

/// Typed publish/subscribe bus between the capability handlers and the UI layer.
#[derive(Clone)]
pub struct ConfiguratorBus {
    sender: broadcast::Sender<ConfiguratorEvent>,
}

impl ConfiguratorBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConfiguratorEvent> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers saw the event.
    pub fn publish(&self, event: ConfiguratorEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!(?event, "no configurator subscribers");
                0
            }
        }
    }
}

impl Default for ConfiguratorBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl fmt::Debug for ConfiguratorBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguratorBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

/// Symbolic location ids mapped to concrete paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationTable {
    entries: Vec<(String, String)>,
}

impl LocationTable {
    #[must_use]
    pub const fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Insert or replace a location.
    #[must_use]
    pub fn with(mut self, id: impl Into<String>, path: impl Into<String>) -> Self {
        let id = id.into();
        let path = path.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = path,
            None => self.entries.push((id, path)),
        }
        self
    }

    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, path)| path.as_str())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LocationTable {
    fn default() -> Self {
        Self::empty()
            .with("home", "/")
            .with("ixModels", "/build/ix")
            .with("ixXDrive50Customize", "/build/ix/xdrive50/customize")
            .with("ixM60Customize", "/build/ix/m60/customize")
    }
}

fn navigate_schema(locations: &LocationTable) -> Value {
    let ids: Vec<&str> = locations.ids().collect();
    json!({
        "type": "object",
        "properties": {
            "id": {
                "type": "string",
                "description": "Symbolic id of the page to open",
                "enum": ids,
            }
        },
        "required": ["id"]
    })
}

/// Build the configurator registry once at session setup.
///
/// # Errors
/// Returns an error if a parameter schema cannot be generated.
#[allow(clippy::result_large_err)]
pub fn registry(bus: &ConfiguratorBus, locations: LocationTable) -> Result<ToolRegistry> {
    let mut tools = ToolRegistry::new();

    let b = bus.clone();
    tools.tool(
        CHANGE_VEHICLE_COLOR,
        "Changes the vehicle color",
        move |args: ChangeVehicleColorArgs| {
            let bus = b.clone();
            async move {
                bus.publish(ConfiguratorEvent::ExteriorColorChanged(args.color));
                Ok(json!({ "success": true, "color": args.color }))
            }
        },
    )?;

    let b = bus.clone();
    tools.tool(
        CHANGE_INTERIOR_COLOR,
        "Changes the interior upholstery color",
        move |args: ChangeInteriorColorArgs| {
            let bus = b.clone();
            async move {
                bus.publish(ConfiguratorEvent::InteriorChanged(args.upholstery));
                Ok(json!({ "success": true, "upholstery": args.upholstery }))
            }
        },
    )?;

    let b = bus.clone();
    tools.tool(
        SELECT_VEHICLE_MODEL,
        "Selects a vehicle model",
        move |args: SelectVehicleModelArgs| {
            let bus = b.clone();
            async move {
                bus.publish(ConfiguratorEvent::ModelSelected(args.model_id));
                Ok(json!({ "success": true, "modelId": args.model_id }))
            }
        },
    )?;

    let b = bus.clone();
    let schema = navigate_schema(&locations);
    tools.tool_with_schema(
        NAVIGATE_TO,
        "Navigates to a specific page",
        schema,
        move |args: NavigateToArgs| {
            let bus = b.clone();
            let path = locations.resolve(&args.id).map(str::to_string);
            async move {
                let Some(path) = path else {
                    tracing::debug!(id = %args.id, "navigation to unknown location");
                    return Ok(failure_output(format!("unknown location: {}", args.id)));
                };
                bus.publish(ConfiguratorEvent::Navigate { id: args.id.clone(), path: path.clone() });
                Ok(json!({ "success": true, "id": args.id, "path": path }))
            }
        },
    );

    let b = bus.clone();
    tools.tool(
        CHANGE_TAB,
        "Changes the active tab between exterior and interior",
        move |args: ChangeTabArgs| {
            let bus = b.clone();
            async move {
                bus.publish(ConfiguratorEvent::TabChanged(args.tab));
                Ok(json!({ "success": true, "tab": args.tab }))
            }
        },
    )?;

    let b = bus.clone();
    tools.tool(
        SAVE_PHONE_NUMBER,
        "Saves the customer's phone number once they finish customizing the vehicle and shows a confirmation",
        move |args: SavePhoneNumberArgs| {
            let bus = b.clone();
            async move {
                let phone = args.phone_number.trim().to_string();
                if phone.is_empty() {
                    return Ok(failure_output("phone number is empty"));
                }
                bus.publish(ConfiguratorEvent::PhoneNumberSaved(phone.clone()));
                Ok(json!({ "success": true, "phoneNumber": phone }))
            }
        },
    )?;

    Ok(tools)
}
