//! Test that all Rhai code blocks in docs/scripting.md load and render.
//!
//! Run with: cargo test --test scripting_docs

use std::fs;

use figwatch::executor::{NullBackend, PlotExecutor};
use figwatch::loader::ModuleLoader;
use figwatch::registry::FigureList;
use figwatch::settings::Settings;

/// Extract all Rhai code blocks from markdown content
fn extract_rhai_blocks(content: &str) -> Vec<(usize, String)> {
    let mut blocks = Vec::new();
    let mut in_rhai_block = false;
    let mut current_block = String::new();
    let mut block_start_line = 0;

    for (line_num, line) in content.lines().enumerate() {
        if line.trim().starts_with("```rhai") {
            in_rhai_block = true;
            block_start_line = line_num + 1;
            current_block.clear();
        } else if in_rhai_block && line.trim() == "```" {
            in_rhai_block = false;
            blocks.push((block_start_line, current_block.clone()));
        } else if in_rhai_block {
            current_block.push_str(line);
            current_block.push('\n');
        }
    }

    blocks
}

/// Load `source` and run every figure it defines. Returns the figure count.
fn check_script(source: &str, origin: &str) -> Result<usize, String> {
    let settings = Settings::default();
    let namespace = ModuleLoader::new(&settings)
        .load_source(source, origin)
        .map_err(|e| e.to_string())?;
    let list = FigureList::build(&namespace);

    let mut executor = PlotExecutor::new(&settings, Box::new(NullBackend));
    for entry in list.entries() {
        executor.run(entry).map_err(|e| e.to_string())?;
    }
    Ok(list.len())
}

#[test]
fn test_all_rhai_blocks_run() {
    let scripting_md_path = concat!(env!("CARGO_MANIFEST_DIR"), "/docs/scripting.md");
    let content = fs::read_to_string(scripting_md_path).expect("Failed to read scripting.md");

    let blocks = extract_rhai_blocks(&content);
    assert!(!blocks.is_empty(), "No Rhai code blocks found in scripting.md");

    let mut errors = Vec::new();
    let mut figure_count = 0;
    for (line, block) in &blocks {
        match check_script(block, &format!("scripting.md:{}", line)) {
            Ok(n) => figure_count += n,
            Err(e) => errors.push(format!("block at line {}: {}", line, e)),
        }
    }

    assert!(errors.is_empty(), "Rhai blocks failed:\n{}", errors.join("\n"));
    assert!(figure_count > 0, "No figures defined in scripting.md");
}

#[test]
fn test_gallery_demo_runs() {
    let gallery_path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/gallery.rhai");
    let source = fs::read_to_string(gallery_path).expect("Failed to read gallery.rhai");

    let count = check_script(&source, "gallery.rhai").unwrap();
    assert!(count >= 3, "gallery should define several figures, found {}", count);
}

#[test]
fn test_extract_blocks() {
    let md = "text\n```rhai\nlet a = 1;\n```\n```\nnot rhai\n```\n";
    let blocks = extract_rhai_blocks(md);
    assert_eq!(blocks, vec![(2, "let a = 1;\n".to_string())]);
}
