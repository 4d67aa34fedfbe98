//! Exercises the full `pus::run` pipeline against real files on disk,
//! rather than `pus::split`'s in-memory entry point — this is the only
//! place the `--tags`/`TAGS_FILE` file-reading path and the `.pu.c` output
//! naming convention (spec §6) get driven end to end.

use std::fs;

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use pus::config::Cli;

#[test]
fn run_reads_tags_file_and_writes_one_pu_c_per_partial_unit() {
    let dir = tempdir().expect("create temp dir");
    let input_path = dir.path().join("unit.i");
    let tags_path = dir.path().join("unit.tags");
    let out_dir = dir.path().join("out");

    fs::write(
        &input_path,
        "int helper(int x) {\n    return x + 1;\n}\n\nint caller(int x) {\n    return helper(x);\n}\n",
    )
    .expect("write input file");
    fs::write(
        &tags_path,
        "helper\tunit.i\t1;\"\tkind:function\tline:1\tend:3\n\
         caller\tunit.i\t5;\"\tkind:function\tline:5\tend:7\n",
    )
    .expect("write tags file");

    let cli = Cli {
        input: input_path.clone(),
        out_dir: out_dir.clone(),
        tags_file: Some(tags_path),
        ctags_bin: "ctags".to_string(),
        target_pu_size: 1,
        passthrough_threshold: 8,
        split: true,
        pu_filter: None,
    };

    pus::run(&cli).expect("run should succeed");

    let pu0 = fs::read_to_string(out_dir.join("unit.i_0.pu.c")).expect("pu 0 written");
    let pu1 = fs::read_to_string(out_dir.join("unit.i_1.pu.c")).expect("pu 1 written");

    assert_eq!(pu0.trim_end(), "int helper(int x) {\n    return x + 1;\n}");
    assert_eq!(
        pu1.trim_end(),
        "int helper();\nint caller(int x) {\n    return helper(x);\n}"
    );
}
