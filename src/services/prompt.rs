use crate::models::job::SchemaVersion;

/// Prompt revision stamped on jobs created without an explicit override.
pub const CURRENT_PROMPT_VERSION: &str = "menu-v2.3";

/// System instruction plus user-message instructions for one extraction call.
#[derive(Debug, Clone)]
pub struct PromptPackage {
    pub system: String,
    pub instructions: String,
}

const SYSTEM_INSTRUCTION: &str = "You are a menu digitization engine. You read a photo of a \
restaurant menu and return its full structure as JSON. Respond with exactly one JSON object and \
nothing else: no prose, no markdown fences, no commentary.";

const COMMON_RULES: &str = "\
Rules:\n\
- Extract every category and item visible in the image, preserving the menu's own grouping.\n\
- Report a confidence between 0 and 1 for every category and every item.\n\
- Report the menu's currency as an ISO 4217 code in a top-level \"currency\" field.\n\
- Text that looks like menu content but cannot be confidently structured goes into \
\"uncertain_items\" as {\"text\", \"reason\", \"confidence\", \"suggested_category\"?, \
\"suggested_price\"?}.\n\
- Decorative or non-menu text (slogans, opening hours, addresses) goes into \
\"superfluous_text\" as {\"text\", \"context\", \"confidence\"}.\n\
- Never invent items that are not in the image.";

const V1_SCHEMA: &str = "\
Schema (version 1):\n\
{\n\
  \"categories\": [{\"name\", \"confidence\", \"items\": [{\"name\", \"price\", \
\"description\"?, \"confidence\"}], \"subcategories\"?: [...]}],\n\
  \"currency\", \"uncertain_items\"?: [...], \"superfluous_text\"?: [...]\n\
}\n\
Every item must carry a numeric \"price\".";

const V2_SCHEMA: &str = "\
Schema (version 2):\n\
{\n\
  \"categories\": [{\"name\", \"confidence\", \"items\": [...], \"subcategories\"?: [...]}],\n\
  \"currency\", \"uncertain_items\"?: [...], \"superfluous_text\"?: [...]\n\
}\n\
Items: {\"name\", \"confidence\", \"price\"?, \"description\"?, \"variants\"?: [{\"name\", \
\"price\"}], \"modifier_groups\"?: [{\"name\", \"required\"?, \"options\": [{\"name\", \
\"price\"?}]}], \"additional_info\"?: [...], \"item_type\"?: \"standard\"|\"set_menu\", \
\"set_menu\"?: {\"price\"?, \"courses\": [{\"name\", \"choices\": [...]}]}}\n\
Every item must carry at least one of: a price, a non-empty variants list, or a set_menu body. \
An item with \"item_type\": \"set_menu\" must carry the set_menu body.";

const V1_EXAMPLE: &str = "\
Example output for a small cafe menu:\n\
{\"categories\":[{\"name\":\"Coffee\",\"confidence\":0.97,\"items\":[{\"name\":\"Espresso\",\
\"price\":3.0,\"confidence\":0.95},{\"name\":\"Flat White\",\"price\":4.5,\
\"description\":\"double shot\",\"confidence\":0.93}]}],\"currency\":\"USD\",\
\"uncertain_items\":[],\"superfluous_text\":[{\"text\":\"Est. 1987\",\"context\":\"header\",\
\"confidence\":0.9}]}";

const V2_EXAMPLE: &str = "\
Example output for a wine list entry with variants:\n\
{\"categories\":[{\"name\":\"Wine\",\"confidence\":0.96,\"items\":[{\"name\":\"House Red\",\
\"confidence\":0.94,\"variants\":[{\"name\":\"Glass\",\"price\":8.0},{\"name\":\"Bottle\",\
\"price\":30.0}]}]}],\"currency\":\"EUR\",\"uncertain_items\":[{\"text\":\"Ask about our \
specials\",\"reason\":\"no price or item structure\",\"confidence\":0.4}],\
\"superfluous_text\":[]}";

/// Build the prompt for a schema version. High-fidelity attempts include the
/// few-shot example; the reduced-fidelity fallback drops it to shrink the
/// request.
pub fn build(schema_version: SchemaVersion, include_examples: bool) -> PromptPackage {
    let (schema, example) = match schema_version {
        SchemaVersion::V1 => (V1_SCHEMA, V1_EXAMPLE),
        SchemaVersion::V2 => (V2_SCHEMA, V2_EXAMPLE),
    };

    let mut instructions = format!(
        "Extract the complete menu from the attached photo.\n\n{COMMON_RULES}\n\n{schema}"
    );
    if include_examples {
        instructions.push_str("\n\n");
        instructions.push_str(example);
    }

    PromptPackage {
        system: SYSTEM_INSTRUCTION.to_string(),
        instructions,
    }
}
