//! Static fallback wording per persona.
//!
//! The correctness backstop for "a notification is always delivered":
//! whatever happens to the remote generator, these templates produce a
//! non-empty, already-localized body with the station name substituted.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::core::model::Persona;

const STATION_PLACEHOLDER: &str = "{station}";

lazy_static! {
    static ref FALLBACK_TEMPLATES: HashMap<Persona, &'static str> = {
        let mut templates = HashMap::new();
        templates.insert(
            Persona::Standard,
            "Arriving at {station} soon. Time to get ready.",
        );
        templates.insert(
            Persona::Healing,
            "We're almost at {station}. Take a breath and gather your things.",
        );
        templates.insert(
            Persona::Strict,
            "{station} is next. Get up now or you will miss it.",
        );
        templates.insert(
            Persona::Cheerful,
            "Heads up! {station} is coming right up!",
        );
        templates
    };
}

/// The fixed fallback body for a persona, with the station name filled in.
pub fn fallback_message(station_name: &str, persona: Persona) -> String {
    let template = FALLBACK_TEMPLATES
        .get(&persona)
        .unwrap_or(&"Arriving at {station} soon.");
    template.replace(STATION_PLACEHOLDER, station_name)
}
