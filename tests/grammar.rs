use proptest::prelude::*;
use tabledef::{
    error::DiagnosticCode,
    tags::{CodeTarget, GenerationScope, parse_header},
    types::{BaseType, FieldType, resolve_type},
};

#[test]
fn skill_id_header_resolves_client_reference_to_skill() {
    let tags = parse_header("SkillId@Client@Ref");
    assert_eq!(tags.name, "SkillId");
    assert_eq!(tags.scope, GenerationScope::ClientOnly);
    assert_eq!(tags.reference_target(), Some("Skill"));
    assert!(tags.diagnostics.is_empty());
}

#[test]
fn tags_are_case_insensitive() {
    let tags = parse_header("Title@sErVeR@LAN");
    assert_eq!(tags.scope, GenerationScope::ServerOnly);
    assert!(tags.localized);
}

#[test]
fn explicit_reference_targets_override_name_derivation() {
    assert_eq!(parse_header("Owner@ref_Character").reference_target(), Some("Character"));
    assert_eq!(parse_header("Owner@Ref(Guild)").reference_target(), Some("Guild"));
    assert_eq!(parse_header("Owner(Player)@Reference").reference_target(), Some("Player"));
    assert_eq!(parse_header("item_id@Ref").reference_target(), Some("item"));
}

#[test]
fn parenthetical_on_plain_header_stays_in_the_name() {
    let max = parse_header("Hp(max)");
    let min = parse_header("Hp(min)@Client");
    assert_eq!(max.name, "Hp_max_");
    assert_eq!(min.name, "Hp_min_");
    assert_eq!(max.reference_target(), None);
    assert!(max.diagnostics.is_empty());

    assert_eq!(parse_header("Owner(Player)@Ref").name, "Owner");
}

#[test]
fn conflicting_scope_tags_keep_last_and_warn() {
    let tags = parse_header("Price@Client@Server");
    assert_eq!(tags.scope, GenerationScope::ServerOnly);
    assert!(
        tags.diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::ConflictingScopeTags)
    );
    assert!(!tags.scope.includes(CodeTarget::Client));
}

#[test]
fn unknown_tags_are_reported_and_ignored() {
    let tags = parse_header("Hp@Client@Shiny");
    assert_eq!(tags.scope, GenerationScope::ClientOnly);
    assert_eq!(tags.diagnostics.len(), 1);
    assert_eq!(tags.diagnostics[0].code, DiagnosticCode::UnknownTag);
}

#[test]
fn reference_without_target_degrades_to_plain() {
    let tags = parse_header("Owner@Ref");
    assert_eq!(tags.reference_target(), None);
    assert_eq!(tags.diagnostics[0].code, DiagnosticCode::MissingReferenceTarget);
}

#[test]
fn map_and_kvp_accept_either_separator() {
    for text in ["map<string,int>", "map<string;int>", "MAP<string, int32>"] {
        assert_eq!(
            resolve_type(text).field_type,
            FieldType::Map {
                key: BaseType::String,
                value: BaseType::Int32
            },
            "{text}"
        );
    }
    assert_eq!(
        resolve_type("kvp<int;float>").field_type.to_string(),
        "kvp<int32,float>"
    );
}

#[test]
fn malformed_types_degrade_to_string_with_warning() {
    for text in ["map<int>", "int[][][]", "list<int", "in t"] {
        let resolution = resolve_type(text);
        assert_eq!(resolution.field_type, FieldType::Scalar(BaseType::String), "{text}");
        assert_eq!(resolution.diagnostics.len(), 1, "{text}");
    }
    let unknown = resolve_type("vector3[]");
    assert_eq!(unknown.field_type, FieldType::Array(BaseType::String));
    assert_eq!(unknown.diagnostics[0].code, DiagnosticCode::UnknownBaseType);
}

fn tag() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "Client", "Server", "All", "Lan", "Ref", "ref_Item", "client", "SERVER", "Localization",
    ])
}

proptest! {
    #[test]
    fn pm_wins_in_any_position(
        before in prop::collection::vec(tag(), 0..4),
        after in prop::collection::vec(tag(), 0..4),
        spelling in prop::sample::select(vec!["PM", "pm", "Pm"]),
    ) {
        let mut header = String::from("Name");
        for t in before.iter().copied().chain([spelling]).chain(after.iter().copied()) {
            header.push('@');
            header.push_str(t);
        }
        let tags = parse_header(&header);
        prop_assert_eq!(tags.scope, GenerationScope::None);
        prop_assert!(tags.scope.is_excluded());
    }

    #[test]
    fn displayed_types_resolve_to_themselves(
        base in prop::sample::select(vec![
            "int", "long", "float", "double", "bool", "string", "byte", "short", "uint",
            "ulong", "ushort", "sbyte", "int32", "uint64", "widget",
        ]),
        shape in 0usize..5,
    ) {
        let text = match shape {
            0 => base.to_string(),
            1 => format!("{base}[]"),
            2 => format!("repeated repeated {base}"),
            3 => format!("map<string,{base}>"),
            _ => format!("kvp<{base};int>"),
        };
        let first = resolve_type(&text).field_type;
        let again = resolve_type(&first.to_string()).field_type;
        prop_assert_eq!(first, again);
    }
}
