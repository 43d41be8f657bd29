use std::fs::File;
use std::io::{self, BufReader, BufWriter, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use colored::Colorize;
use quiver_format::compose::{self, ExtractReport};
use quiver_format::{upgrade_legacy, DuplicatePolicy, QuiverConfig, QuiverWriter, ScoreTable, TagIndex};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    debug!(?config, "configuration loaded");
    match cli.command {
        Command::Build(args) => cmd_build(args),
        Command::Ls(args) => cmd_ls(args),
        Command::Extract(args) => cmd_extract(args, &config),
        Command::ExtractSpecific(args) => cmd_extract_specific(args, &config),
        Command::Scorefile(args) => cmd_scorefile(args, &config),
        Command::Rename(args) => cmd_rename(args),
        Command::Split(args) => cmd_split(args, &config),
        Command::Slice(args) => cmd_slice(args, &config),
        Command::Upgrade(args) => cmd_upgrade(args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<QuiverConfig> {
    match path {
        Some(path) => Ok(QuiverConfig::load(path)?),
        None => Ok(QuiverConfig::default()),
    }
}

fn open_stream(path: &Path) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(BufReader::new(file))
}

/// Tags given as arguments or, when there are none, piped on stdin.
fn collect_tags(tags: Vec<String>) -> anyhow::Result<Vec<String>> {
    let stdin = io::stdin();
    if !tags.is_empty() || stdin.is_terminal() {
        return Ok(tags);
    }
    read_tags(stdin.lock())
}

/// Whitespace-separated tags from `input`.
fn read_tags<R: Read>(mut input: R) -> anyhow::Result<Vec<String>> {
    let mut piped = String::new();
    input
        .read_to_string(&mut piped)
        .context("cannot read tags from stdin")?;
    Ok(piped.split_whitespace().map(str::to_string).collect())
}

fn policy(args: DuplicateArgs, config: &QuiverConfig) -> DuplicatePolicy {
    if args.all {
        DuplicatePolicy::All
    } else if args.first {
        DuplicatePolicy::First
    } else {
        config.duplicate_policy
    }
}

/// Send a stream to `output`, or to stdout when no path is given.
fn emit_stream<F>(output: Option<&Path>, fill: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut dyn Write) -> quiver_format::QuiverResult<()>,
{
    match output {
        Some(path) => compose::write_atomic(path, true, fill)
            .with_context(|| format!("cannot write {}", path.display())),
        None => {
            let mut out = BufWriter::new(io::stdout().lock());
            fill(&mut out)?;
            out.flush()?;
            Ok(())
        }
    }
}

fn cmd_build(args: BuildArgs) -> anyhow::Result<()> {
    if args.append {
        let output = args.output.as_deref().context("--append needs --output")?;
        let added = compose::append_files(output, &args.files)?;
        eprintln!("{} Appended {} entries to {}", "✓".green().bold(), added, output.display().to_string().bold());
        return Ok(());
    }
    emit_stream(args.output.as_deref(), |out| {
        compose::build_stream(&args.files, &mut QuiverWriter::new(out)).map(|_| ())
    })?;
    if let Some(output) = &args.output {
        eprintln!("{} Packed {} files into {}", "✓".green().bold(), args.files.len(), output.display().to_string().bold());
    }
    Ok(())
}

fn cmd_ls(args: StreamArgs) -> anyhow::Result<()> {
    let index = TagIndex::build(open_stream(&args.file)?)?;
    let mut out = BufWriter::new(io::stdout().lock());
    for tag in index.tags() {
        writeln!(out, "{tag}")?;
    }
    out.flush()?;
    debug!(entries = index.entry_count(), "tags listed");
    for tag in index.duplicates() {
        eprintln!("  {} {} names {} entries", "duplicate:".yellow(), tag, index.lookup(tag).len());
    }
    Ok(())
}

fn print_extract_report(report: &ExtractReport) {
    for path in &report.written {
        println!("  {} {}", "wrote:".green(), path.display());
    }
    for path in &report.skipped {
        println!("  {} {} (exists)", "skipped:".yellow(), path.display());
    }
    for tag in &report.missing {
        println!("  {} {}", "missing:".red(), tag);
    }
}

fn cmd_extract(args: ExtractArgs, config: &QuiverConfig) -> anyhow::Result<()> {
    let report = compose::extract_all(
        open_stream(&args.file)?,
        &args.output_dir,
        &config.extension,
        args.force || config.overwrite,
    )?;
    print_extract_report(&report);
    println!("{} Extracted {} payloads", "✓".green().bold(), report.written.len());
    Ok(())
}

fn cmd_extract_specific(args: ExtractSpecificArgs, config: &QuiverConfig) -> anyhow::Result<()> {
    let tags = collect_tags(args.tags)?;
    if tags.is_empty() {
        bail!("no tags given");
    }
    let index = TagIndex::build(open_stream(&args.file)?)?;
    let mut src = File::open(&args.file)?;
    let report = compose::extract_tags(
        &mut src,
        &index,
        &tags,
        &args.output_dir,
        &config.extension,
        policy(args.duplicates, config),
        args.force || config.overwrite,
    )?;
    print_extract_report(&report);
    println!("{} Extracted {} payloads", "✓".green().bold(), report.written.len());
    Ok(())
}

fn cmd_scorefile(args: ScorefileArgs, config: &QuiverConfig) -> anyhow::Result<()> {
    let table = ScoreTable::from_reader(open_stream(&args.file)?)?;
    if table.has_no_terms() {
        bail!("no metadata found in {}", args.file.display());
    }
    let output = args
        .output
        .unwrap_or_else(|| args.file.with_extension("csv"));
    let delimiter = config.delimiter_byte()?;
    compose::write_atomic(&output, true, |out| {
        table.write_delimited(out, delimiter, &config.missing_marker)
    })
    .with_context(|| format!("cannot write {}", output.display()))?;
    println!("{} Wrote {} rows to {}", "✓".green().bold(), table.len(), output.display().to_string().bold());
    Ok(())
}

fn cmd_rename(args: RenameArgs) -> anyhow::Result<()> {
    let tags = collect_tags(args.tags)?;
    let renamed = compose::rename_in_place(&args.file, &tags)
        .with_context(|| format!("rename of {} failed; file left unchanged", args.file.display()))?;
    println!("{} Renamed {} entries in {}", "✓".green().bold(), renamed, args.file.display().to_string().bold());
    Ok(())
}

fn cmd_split(args: SplitArgs, config: &QuiverConfig) -> anyhow::Result<()> {
    let prefix = args.prefix.as_deref().unwrap_or(&config.split_prefix);
    let pieces: Vec<PathBuf> =
        compose::split(open_stream(&args.file)?, args.ntags, &args.output_dir, prefix)?;
    for path in &pieces {
        println!("  {} {}", "wrote:".green(), path.display());
    }
    println!("{} Split into {} files", "✓".green().bold(), pieces.len());
    Ok(())
}

fn cmd_slice(args: SliceArgs, config: &QuiverConfig) -> anyhow::Result<()> {
    let tags = collect_tags(args.tags)?;
    if tags.is_empty() {
        bail!("no tags given");
    }
    let index = TagIndex::build(open_stream(&args.file)?)?;
    let mut src = File::open(&args.file)?;
    let mut report = None;
    emit_stream(args.output.as_deref(), |out| {
        let mut writer = QuiverWriter::new(out);
        let selection = policy(args.duplicates, config);
        report = Some(compose::slice(&mut src, &index, &tags, selection, &mut writer)?);
        Ok(())
    })?;
    if let Some(report) = report {
        for tag in &report.missing {
            eprintln!("  {} {}", "missing:".red(), tag);
        }
        eprintln!("{} Sliced {} entries", "✓".green().bold(), report.written.len());
    }
    Ok(())
}

fn cmd_upgrade(args: UpgradeArgs) -> anyhow::Result<()> {
    let reader = open_stream(&args.file)?;
    let mut converted = 0;
    emit_stream(args.output.as_deref(), |out| {
        converted = upgrade_legacy(reader, &mut QuiverWriter::new(out))?;
        Ok(())
    })?;
    eprintln!("{} Upgraded {} entries", "✓".green().bold(), converted);
    Ok(())
}
