// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! The instruction sent with every request and the forgiving decoder for replies

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Tagging rubric sent verbatim alongside the images
pub const ANALYSIS_PROMPT: &str = r#"You are a professional short-video content analyst. Study the frames and reply with one standardized JSON object.

## Tag rules (strict)
1. Atomic tags first: always emit the basic tags before any combined tag.
   Right: ["grey stockings", "slouch socks", "grey slouch socks"]  Wrong: ["grey slouch socks"]
2. Split compound attributes: colour + style, thickness + length and style + garment are separate tags.
3. Emit only the tag word itself, never a "group: tag" prefix.
4. Use one language consistently and no spaces inside a tag.

## Tag vocabulary (pick and combine)
- Hosiery colour: black, white, nude, grey, coloured
- Hosiery thickness: ultra-sheer, sheer, medium, thick
- Hosiery length: ankle, mid-calf, over-knee, thigh-high, pantyhose
- Hosiery style: slouch, fishnet, lace, striped, seamless, sheer-toe
- Legs: long-legs, leg-line, raised-leg, crossed-legs, kneeling, lying
- Feet: barefoot, toes, ankle, arch, tiptoe, foot-close-up
- Shoes: heels, stilettos, flats, sandals, slippers, boots, sneakers, mary-janes, open-toe
- Bottoms: short-skirt, mini-skirt, pleated-skirt, pencil-skirt, long-skirt, hot-pants, jeans, leggings, shorts
- Tops: camisole, tube-top, crop-top, shirt, t-shirt, vest, sweater, v-neck, off-shoulder
- Outfits: school-uniform, sailor-suit, qipao, dress, hanfu, lolita, maid, nurse, bunny, swimsuit, bikini, pajamas
- Style: sweet, sexy, innocent, mature, cute, japanese, korean
- Content: dance, outfit-showcase, try-on, outfit-change, cosplay, photoshoot, selfie, daily

## Suggestiveness score (sexy_level 1-10)
A. Exposure baseline: 1-2 everyday outfit; 3-4 slight (short skirt, camisole, crop top);
   5-6 moderate (mini skirt, deep v, hot pants); 7-8 high (bikini, tube top, large bare areas); 9-10 extreme.
B. Outfit bonus: nude hosiery / barefoot / slouch socks +2-3; black hosiery with heels +1-2;
   ultra-sheer or sheer-toe +1-2; fishnet +1; foot close-up +1-2.
C. Camera and pose bonus: close-ups of sensitive areas, low angles, lifting clothes, bending over,
   provocative expressions.

## Output fields
- tags: array of 8-20 tags including every basic tag recognised
- category: main category (dance / outfit-showcase / cosplay / photoshoot / daily / tutorial)
- summary: one sentence, at most 15 characters
- scene: bedroom / living-room / outdoor / dance-studio / other
- sexy_level: integer 1-10

## Example
Video: a girl in grey slouch socks dancing
Output: {"tags":["grey stockings","slouch socks","dance","long-legs","short-skirt"],"category":"dance","summary":"slouch sock dance","scene":"dance-studio","sexy_level":5}

## Output format (strict JSON, no other text)
{"tags":["tag1","tag2"],"category":"category","summary":"summary","scene":"scene","sexy_level":5}"#;

/// Decoded model reply; every field is independently optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedModelResponse {
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub objects: Option<Vec<String>>,
    pub scene: Option<String>,
    #[serde(alias = "sexyLevel")]
    pub sexy_level: Option<i64>,
}

/// One way of turning cleaned JSON text into a response
type DecodeStrategy = fn(&str) -> Option<ParsedModelResponse>;

/// Tried in order until one yields a value
const DECODE_STRATEGIES: &[(&str, DecodeStrategy)] = &[
    ("lenient", decode_lenient),
    ("strict", decode_strict),
];

/// Parse raw model output. `None` means the reply could not be understood.
pub fn parse_response(raw: &str) -> Option<ParsedModelResponse> {
    let text = unwrap_first_array_element(extract_json_block(raw));

    for (name, strategy) in DECODE_STRATEGIES {
        if let Some(parsed) = strategy(&text) {
            debug!("Model reply decoded with {} strategy", name);
            return Some(parsed);
        }
    }

    warn!("Unparseable model reply: {}", preview(&text, 500));
    None
}

/// Strip surrounding whitespace and any markdown code fence
fn extract_json_block(raw: &str) -> &str {
    let text = raw.trim();
    let inner = if let Some(start) = text.find("```json") {
        between_fences(text, start + "```json".len())
    } else if let Some(start) = text.find("```") {
        between_fences(text, start + 3)
    } else {
        None
    };
    inner.unwrap_or(text).trim()
}

/// Text from `body_start` up to the next fence, if there is one
fn between_fences(text: &str, body_start: usize) -> Option<&str> {
    let rest = &text[body_start..];
    rest.find("```").map(|end| &rest[..end])
}

/// Arrays of objects are reduced to their first element
fn unwrap_first_array_element(text: &str) -> String {
    if text.starts_with('[') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) {
            if let Some(first @ Value::Object(_)) = items.into_iter().next() {
                return first.to_string();
            }
        }
    }
    text.to_string()
}

/// Key-by-key extraction from any JSON object; mistyped fields are dropped, not fatal
fn decode_lenient(text: &str) -> Option<ParsedModelResponse> {
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(text) else {
        return None;
    };

    Some(ParsedModelResponse {
        tags: string_list(&obj, "tags"),
        category: string_field(&obj, "category"),
        summary: string_field(&obj, "summary"),
        objects: string_list(&obj, "objects"),
        scene: string_field(&obj, "scene"),
        sexy_level: int_field(&obj, "sexy_level").or_else(|| int_field(&obj, "sexyLevel")),
    })
}

/// Typed decode of the documented shape
fn decode_strict(text: &str) -> Option<ParsedModelResponse> {
    serde_json::from_str(text).ok()
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(obj: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    let items = obj.get(key)?.as_array()?;
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Integers, including whole floats such as `6.0`
fn int_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = obj.get(key)?;
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() <= i64::MAX as f64)
            .map(|f| f as i64)
    })
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_block() {
        let parsed = parse_response("```json\n{\"tags\":[\"a\"],\"sexy_level\":5}\n```").unwrap();
        assert_eq!(parsed.tags, Some(vec!["a".to_string()]));
        assert_eq!(parsed.sexy_level, Some(5));
        assert_eq!(parsed.category, None);
    }

    #[test]
    fn plain_fence_with_prose_around_it() {
        let raw = "Here you go:\n```\n{\"category\":\"dance\",\"scene\":\"outdoor\"}\n```\nEnjoy";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.category.as_deref(), Some("dance"));
        assert_eq!(parsed.scene.as_deref(), Some("outdoor"));
    }

    #[test]
    fn array_of_one_object() {
        let parsed = parse_response("[{\"category\":\"x\"}]").unwrap();
        assert_eq!(parsed.category.as_deref(), Some("x"));
    }

    #[test]
    fn not_json_is_a_parse_failure() {
        assert_eq!(parse_response("not json"), None);
        assert_eq!(parse_response(""), None);
        assert_eq!(parse_response("[1, 2, 3]"), None);
        assert_eq!(parse_response("```json\n{broken\n```"), None);
    }

    #[test]
    fn camel_case_level_is_accepted() {
        let parsed = parse_response("{\"sexyLevel\": 7}").unwrap();
        assert_eq!(parsed.sexy_level, Some(7));

        let both = parse_response("{\"sexy_level\": 3, \"sexyLevel\": 9}").unwrap();
        assert_eq!(both.sexy_level, Some(3));
    }

    #[test]
    fn mistyped_fields_are_dropped_individually() {
        let parsed = parse_response(
            "{\"tags\":\"oops\",\"summary\":\"ok\",\"sexy_level\":\"high\",\"objects\":[\"cup\"]}",
        )
        .unwrap();
        assert_eq!(parsed.tags, None);
        assert_eq!(parsed.summary.as_deref(), Some("ok"));
        assert_eq!(parsed.sexy_level, None);
        assert_eq!(parsed.objects, Some(vec!["cup".to_string()]));
    }

    #[test]
    fn tag_order_and_duplicates_survive() {
        let parsed = parse_response("{\"tags\":[\"b\",\"a\",\"b\"]}").unwrap();
        assert_eq!(parsed.tags, Some(vec!["b".into(), "a".into(), "b".into()]));
    }

    #[test]
    fn strict_decode_handles_alias() {
        let parsed = decode_strict("{\"sexyLevel\": 4, \"category\": \"cosplay\"}").unwrap();
        assert_eq!(parsed.sexy_level, Some(4));
        assert_eq!(parsed.category.as_deref(), Some("cosplay"));
    }

    #[test]
    fn whole_float_level_is_accepted() {
        let parsed = parse_response("{\"sexy_level\": 6.0, \"category\": \"dance\"}").unwrap();
        assert_eq!(parsed.sexy_level, Some(6));
        assert_eq!(parsed.category.as_deref(), Some("dance"));

        let fractional = parse_response("{\"sexy_level\": 6.5}").unwrap();
        assert_eq!(fractional.sexy_level, None);
    }
}
