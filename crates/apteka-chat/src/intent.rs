//! Intent dispatch over the language service's tool-calling protocol.
//!
//! The orchestrator never classifies text itself. It offers a fixed tool
//! menu, and the reply is turned into exactly one [`Intent`] per turn.

use apteka_core::types::{Coordinates, ExtractedQuery, SlotField, SlotSet};
use apteka_llm::{LlmReply, ToolDeclaration};
use serde_json::json;
use tracing::warn;

use crate::error::ChatError;

pub const FIND_PHARMACIES: &str = "find_pharmacies";
pub const FIND_NEAREST_PHARMACIES: &str = "find_nearest_pharmacies";
pub const TRANSCRIBE_ONLY: &str = "transcribe_only";

/// Mandatory argument carrying the verbatim transcription.
pub const TRANSCRIPTION_ARG: &str = "user_query_transcription";

/// Generic words the service tends to leave in front of slot values.
const SLOT_PREFIXES: &[(SlotField, &[&str])] = &[
    (SlotField::Name, &["Аптека ", "аптека "]),
    (
        SlotField::Number,
        &["Номер аптеки ", "номер аптеки ", "Номер ", "номер ", "№"],
    ),
    (SlotField::City, &["город ", "Город ", "г. "]),
    (SlotField::Street, &["улица ", "Улица ", "ул. "]),
    (SlotField::HouseNumber, &["дом ", "д. "]),
];

/// What the caller wants from this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    LocateByAttributes(ExtractedQuery),
    LocateNearest {
        transcription: String,
        coordinates: Coordinates,
    },
    Passthrough {
        transcription: String,
    },
    NoCall {
        text: String,
    },
}

impl Intent {
    /// Decide the intent from the first reply.
    ///
    /// Coordinates sent by the caller take precedence over any the service
    /// puts in its arguments.
    pub fn from_reply(
        reply: &LlmReply,
        caller_coordinates: Option<Coordinates>,
    ) -> Result<Self, ChatError> {
        let Some(call) = &reply.function_call else {
            return Ok(Intent::NoCall {
                text: reply.text.clone(),
            });
        };

        let known = [FIND_PHARMACIES, FIND_NEAREST_PHARMACIES, TRANSCRIBE_ONLY];
        if !known.contains(&call.name.as_str()) {
            warn!(tool = %call.name, "Language service called an undeclared tool");
            return Ok(Intent::NoCall {
                text: reply.text.clone(),
            });
        }

        let transcription = call
            .str_arg(TRANSCRIPTION_ARG)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ChatError::MissingTranscription)?
            .to_string();

        match call.name.as_str() {
            FIND_PHARMACIES => {
                let mut slots = SlotSet::default();
                for field in SlotField::ALL {
                    if let Some(raw) = call.str_arg(field.key()) {
                        slots.set(field, strip_prefixes(field, raw));
                    }
                }
                Ok(Intent::LocateByAttributes(ExtractedQuery {
                    transcription,
                    slots,
                }))
            }
            FIND_NEAREST_PHARMACIES => {
                let coordinates = match caller_coordinates {
                    Some(c) => c,
                    None => match (call.f64_arg("latitude"), call.f64_arg("longitude")) {
                        (Some(lat), Some(lon)) => Coordinates::new(lat, lon)
                            .map_err(|_| ChatError::MissingCoordinates)?,
                        _ => return Err(ChatError::MissingCoordinates),
                    },
                };
                Ok(Intent::LocateNearest {
                    transcription,
                    coordinates,
                })
            }
            _ => Ok(Intent::Passthrough { transcription }),
        }
    }

    /// Tool name this intent answers to, if any.
    pub fn tool_name(&self) -> Option<&'static str> {
        match self {
            Intent::LocateByAttributes(_) => Some(FIND_PHARMACIES),
            Intent::LocateNearest { .. } => Some(FIND_NEAREST_PHARMACIES),
            Intent::Passthrough { .. } => Some(TRANSCRIBE_ONLY),
            Intent::NoCall { .. } => None,
        }
    }

    /// Verbatim transcription, empty for [`Intent::NoCall`].
    pub fn transcription(&self) -> &str {
        match self {
            Intent::LocateByAttributes(q) => &q.transcription,
            Intent::LocateNearest { transcription, .. }
            | Intent::Passthrough { transcription } => transcription,
            Intent::NoCall { .. } => "",
        }
    }
}

/// Trim and drop one leading generic prefix for `field`.
pub fn strip_prefixes(field: SlotField, raw: &str) -> String {
    let value = raw.trim();
    let prefixes = SLOT_PREFIXES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, p)| *p)
        .unwrap_or(&[]);

    for prefix in prefixes {
        if let Some(rest) = value.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    value.to_string()
}

/// The tool menu offered each turn. The nearby search is offered only when
/// the caller shared a position.
pub fn tool_menu(has_coordinates: bool) -> Vec<ToolDeclaration> {
    let transcription = json!({
        "type": "string",
        "description": "Полная дословная расшифровка аудиозапроса пользователя. Обязательное поле."
    });

    let mut tools = vec![ToolDeclaration {
        name: FIND_PHARMACIES.to_string(),
        description: "Ищет аптеки по названию, номеру, городу, улице и номеру дома. \
                      Вызывай, когда пользователь называет аптеку по любому из этих признаков."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                TRANSCRIPTION_ARG: transcription,
                "pharmacy_name": {"type": "string", "description": "Название аптеки без слова «Аптека», например «Адель»."},
                "pharmacy_number": {"type": "string", "description": "Номер аптеки без слов «номер аптеки», например «10»."},
                "city": {"type": "string", "description": "Город без слова «город», например «Минск»."},
                "street": {"type": "string", "description": "Улица без слова «улица», например «Ленина»."},
                "house_number": {"type": "string", "description": "Номер дома, например «15» или «23а»."}
            },
            "required": [TRANSCRIPTION_ARG]
        }),
    }];

    if has_coordinates {
        tools.push(ToolDeclaration {
            name: FIND_NEAREST_PHARMACIES.to_string(),
            description: "Находит ближайшие к пользователю аптеки. Вызывай, когда спрашивают \
                          про аптеки рядом, поблизости или ближайшие."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    TRANSCRIPTION_ARG: transcription,
                    "latitude": {"type": "number", "description": "Широта пользователя."},
                    "longitude": {"type": "number", "description": "Долгота пользователя."}
                },
                "required": [TRANSCRIPTION_ARG]
            }),
        });
    }

    tools.push(ToolDeclaration {
        name: TRANSCRIBE_ONLY.to_string(),
        description: "Вызывай, когда запрос не про поиск аптеки. Передай только расшифровку."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": { TRANSCRIPTION_ARG: transcription },
            "required": [TRANSCRIPTION_ARG]
        }),
    });

    tools
}
