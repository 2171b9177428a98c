use std::{
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use clap::{Parser, ValueEnum};
use glsl_lang::{ast::TranslationUnit, parse::DefaultParse};
use isf::{glsl::GlslVersion, IsfDoc, LoadOptions};
use log::error;
use rayon::prelude::*;

const VERSIONS: [GlslVersion; 5] = [
    GlslVersion::Gl2,
    GlslVersion::GlEs2,
    GlslVersion::Gl3,
    GlslVersion::Gl4,
    GlslVersion::GlEs3,
];

#[derive(Parser)]
#[command(author, version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// The folder to search recursively for ISF files.
    root_folder: String,

    /// The file name pattern to load.
    #[arg(default_value = "*.fs")]
    pattern: String,

    /// Skip invalid metadata instead of failing to load the file.
    #[arg(long)]
    permissive: bool,

    /// Pack non image uniforms into a uniform block when supported.
    #[arg(long)]
    uniform_block: bool,

    /// The minimum level for log messages.
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
}

#[derive(Copy, PartialEq, Clone, Eq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    simple_logger::SimpleLogger::new()
        .with_level(cli.log_level.into())
        .init()
        .unwrap();

    let start = std::time::Instant::now();

    let options = if cli.permissive {
        LoadOptions::permissive()
    } else {
        LoadOptions::default()
    };

    let file_count = AtomicUsize::new(0);
    let failed_count = AtomicUsize::new(0);

    globwalk::GlobWalkerBuilder::from_patterns(&cli.root_folder, &[&cli.pattern])
        .build()
        .unwrap()
        .par_bridge()
        .for_each(|entry| {
            let path = entry.as_ref().unwrap().path();
            file_count.fetch_add(1, Ordering::Relaxed);
            if !check_isf_file(path, options, cli.uniform_block) {
                failed_count.fetch_add(1, Ordering::Relaxed);
            }
        });

    println!(
        "Checked {} files with {} failures in {:?}",
        file_count.into_inner(),
        failed_count.into_inner(),
        start.elapsed()
    );
}

fn check_isf_file(path: &Path, options: LoadOptions, use_uniform_block: bool) -> bool {
    let doc = match IsfDoc::from_file(path, options) {
        Ok(doc) => doc,
        Err(e) => {
            error!("Error loading {path:?}: {}", error_chain(&e));
            return false;
        }
    };

    // Make sure expressions evaluate for common render sizes.
    for render_size in [[1, 1], [1920, 1080]] {
        doc.eval_buffer_dimensions_with_render_size(render_size);
    }

    let mut success = true;
    for version in VERSIONS {
        match doc.generate_shader_source(version, use_uniform_block) {
            Ok(source) => {
                for (stage, glsl) in [("vertex", &source.vertex), ("fragment", &source.fragment)] {
                    if let Err(e) = TranslationUnit::parse(&source_no_directives(glsl)) {
                        error!("Error parsing {version:?} {stage} shader for {path:?}: {e}");
                        success = false;
                    }
                }
            }
            Err(e) => {
                error!("Error generating {version:?} shaders for {path:?}: {e}");
                success = false;
            }
        }
    }
    success
}

// The parser doesn't handle preprocessor directives.
fn source_no_directives(source: &str) -> String {
    source
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(e) = source {
        message += &format!(": {e}");
        source = e.source();
    }
    message
}
