mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, csv_text};
use predicates::str::contains;
use tabledef::{payload, schema::SchemaDefinition};

fn tabledef() -> Command {
    Command::cargo_bin("tabledef").expect("binary exists")
}

fn write_character(workspace: &TestWorkspace) {
    workspace.write(
        "tables/Character.csv",
        &csv_text(&[
            &["Id", "Name@Client@Lan", "ItemId@Ref", "Stats"],
            &["int", "string", "int", "map<string,int>"],
            &["Identifier", "Display name", "Starting item", ""],
            &["", "", "0", ""],
            &["1", "Aria the Brave", "10", "hp:10,mp:5"],
            &["2", "Borin", "", "hp=20"],
        ]),
    );
}

#[test]
fn compile_writes_payload_code_and_localization() {
    let workspace = TestWorkspace::new();
    write_character(&workspace);
    let output = workspace.path().join("out");

    tabledef()
        .args(["compile", "-i"])
        .arg(workspace.path().join("tables"))
        .arg("-o")
        .arg(&output)
        .arg("--emit-schema")
        .assert()
        .success();

    let bytes = fs::read(output.join("Character.bin")).expect("payload written");
    let records = payload::decode(&bytes).expect("payload decodes");
    assert_eq!(records.len(), 2);

    let client = fs::read_to_string(output.join("client/character.rs")).expect("client code");
    assert!(client.contains("pub struct Character {"));
    assert!(client.contains("pub name: String,"));
    let server = fs::read_to_string(output.join("server/character.rs")).expect("server code");
    assert!(!server.contains("pub name"));

    let localization = fs::read_to_string(output.join("localization.csv")).expect("localization");
    assert!(localization.starts_with("key,text,table,field\n"));
    assert!(localization.contains("NAME_ARIA_THE_BRAVE,Aria the Brave,Character,Name"));
    assert!(localization.contains("NAME_BORIN,Borin,Character,Name"));

    let schema = SchemaDefinition::load(&output.join("Character.schema.json")).expect("schema");
    assert_eq!(schema.field_names(), vec!["Id", "Name", "ItemId", "Stats"]);
}

#[test]
fn compile_fails_on_unknown_reference_type() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "Character.csv",
        &csv_text(&[
            &["Id", "SkillId@Client@Ref"],
            &["int", "int"],
            &["", ""],
            &["", ""],
            &["1", "100"],
        ]),
    );

    tabledef()
        .args(["compile", "-i"])
        .arg(&input)
        .arg("-o")
        .arg(workspace.path().join("out"))
        .assert()
        .failure()
        .stderr(contains("Compilation failed"))
        .stderr(contains("Character"));
    assert!(!workspace.path().join("out/Character.bin").exists());
}

#[test]
fn known_type_flag_accepts_extra_reference_targets() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "Character.csv",
        &csv_text(&[
            &["Id", "SkillId@Ref"],
            &["int", "int"],
            &["", ""],
            &["", ""],
            &["1", "100"],
        ]),
    );

    tabledef()
        .args(["compile", "-i"])
        .arg(&input)
        .arg("-o")
        .arg(workspace.path().join("out"))
        .args(["--known-type", "Skill"])
        .assert()
        .success();
    assert!(workspace.path().join("out/Character.bin").exists());
}

#[test]
fn config_rules_fail_the_compile() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "Hero.csv",
        &csv_text(&[
            &["Id", "Level"],
            &["int", "int"],
            &["", ""],
            &["", ""],
            &["1", "150"],
        ]),
    );
    let config = workspace.write(
        "tabledef.yaml",
        "rules:\n  Hero:\n    rules:\n      - field: Level\n        rule: range\n        min: 1\n        max: 99\n",
    );

    tabledef()
        .args(["compile", "-i"])
        .arg(&input)
        .arg("-o")
        .arg(workspace.path().join("out"))
        .arg("-c")
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("Hero"));
}

#[test]
fn inspect_prints_resolved_columns() {
    let workspace = TestWorkspace::new();
    write_character(&workspace);

    tabledef()
        .args(["inspect", "-i"])
        .arg(workspace.path().join("tables/Character.csv"))
        .args(["--namespace", "Game"])
        .assert()
        .success()
        .stdout(contains("Table: Character"))
        .stdout(contains("Namespace: Game"))
        .stdout(contains("localized"))
        .stdout(contains("ref Item"));
}

#[test]
fn inspect_json_emits_schema() {
    let workspace = TestWorkspace::new();
    write_character(&workspace);

    let output = tabledef()
        .args(["inspect", "--json", "-i"])
        .arg(workspace.path().join("tables/Character.csv"))
        .output()
        .expect("run inspect");
    assert!(output.status.success());
    let schema: SchemaDefinition = serde_json::from_slice(&output.stdout).expect("schema json");
    assert_eq!(schema.name, "Character");
    assert_eq!(schema.fields.len(), 4);
}
