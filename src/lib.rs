//! Splits one preprocessed C translation unit into independently
//! compilable partial units, using an external tag stream plus a
//! source-scanning pass to close each unit's dependency graph and
//! synthesize whatever declarations it's missing.

pub mod config;
pub mod emit;
pub mod lexer;
pub mod partition;
pub mod resolve;
pub mod scanner;
pub mod symtab;
pub mod synth;
pub mod tags;

use anyhow::{Context, Result};
use tracing::info;

use symtab::SymbolTable;
use tags::SourceLines;

/// Build the symbol table and render every partial unit for `source`, given
/// its tag stream. Pure and filesystem-free, so it's exercised directly by
/// integration tests without a working directory or a real tag extractor.
pub fn split(
    source: &str,
    tag_stream: &str,
    primary_file: &str,
    config: &partition::PartitionConfig,
) -> Vec<emit::RenderedPu> {
    let mut table = SymbolTable::default();
    let records = tags::parse_tag_stream(tag_stream);
    let lines = SourceLines::new(source);
    tags::ingest(&mut table, &records, &lines);
    scanner::scan(&mut table, source, primary_file);

    let frozen = table.freeze();
    let pus = partition::partition(&frozen, config);
    info!(count = pus.len(), "partitioned translation unit");

    // Closure already ran during partitioning; rendering each PU only reads
    // the frozen table, so the partial units can be emitted concurrently.
    let mut rendered: Vec<emit::RenderedPu> = std::thread::scope(|scope| {
        let handles: Vec<_> = pus
            .iter()
            .map(|pu| scope.spawn(|| emit::render(&frozen, pu)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    rendered.sort_by_key(|r| r.id);
    rendered
}

/// Run the full command-line pipeline: read the input file, obtain a tag
/// stream, split, and write one `<stem>_<id>.pu.c` file per partial unit.
pub fn run(cli: &config::Cli) -> Result<()> {
    let source = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;
    let tag_stream = cli.load_tag_stream()?;
    let file_name = cli
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cli.input.display().to_string());

    let rendered = split(&source, &tag_stream, &file_name, &cli.partition_config());

    std::fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("creating output directory {}", cli.out_dir.display()))?;

    // spec §6: `INPUT.i_N.pu.c` — the full input file name (including its
    // `.i` extension) is the stem, not the name with `.i` stripped.
    for pu in &rendered {
        let out_path = cli.out_dir.join(format!("{file_name}_{}.pu.c", pu.id));
        std::fs::write(&out_path, &pu.text)
            .with_context(|| format!("writing {}", out_path.display()))?;
        info!(path = %out_path.display(), "wrote partial unit");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use partition::PartitionConfig;

    #[test]
    fn end_to_end_split_closes_helper_dependency() {
        let source = "int helper(int x) {\n    return x + 1;\n}\n\nint caller(int x) {\n    return helper(x);\n}\n";
        let tags = "helper\tu.i\t1;\"\tkind:function\tline:1\tend:3\n\
                    caller\tu.i\t5;\"\tkind:function\tline:5\tend:7\n";
        let config = PartitionConfig {
            target_pu_size: 1,
            split: true,
            ..Default::default()
        };
        let rendered = split(source, tags, "u.i", &config);
        assert_eq!(rendered.len(), 2);
        let caller_pu = rendered
            .iter()
            .find(|p| p.text.contains("caller"))
            .unwrap();
        assert!(caller_pu.text.contains("int helper();"));
    }
}
