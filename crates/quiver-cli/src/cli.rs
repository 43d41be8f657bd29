use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "quiver",
    about = "Pack, inspect, and reshape Quiver streams of tagged payloads",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log per-entry progress to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML file with tool defaults
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Pack files into a stream, one entry per file
    Build(BuildArgs),
    /// List the tags of a stream in order
    Ls(StreamArgs),
    /// Write every payload to its own file
    Extract(ExtractArgs),
    /// Write the payloads of selected tags
    ExtractSpecific(ExtractSpecificArgs),
    /// Tabulate entry metadata
    Scorefile(ScorefileArgs),
    /// Replace every tag, in order, rewriting the stream in place
    Rename(RenameArgs),
    /// Split a stream into pieces of at most NTAGS entries
    Split(SplitArgs),
    /// Copy selected entries into a new stream
    Slice(SliceArgs),
    /// Convert an unterminated legacy stream
    Upgrade(UpgradeArgs),
}

#[derive(Args)]
pub struct BuildArgs {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Output stream (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Add to the output stream instead of replacing it
    #[arg(long, requires = "output")]
    pub append: bool,
}

#[derive(Args)]
pub struct StreamArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ExtractArgs {
    pub file: PathBuf,
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,
    /// Replace files that already exist
    #[arg(long)]
    pub force: bool,
}

/// Selection among entries sharing a tag.
#[derive(Args, Clone, Copy, Debug, Default)]
#[group(multiple = false)]
pub struct DuplicateArgs {
    /// Take the first entry of a duplicated tag
    #[arg(long)]
    pub first: bool,
    /// Take every entry of a duplicated tag
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct ExtractSpecificArgs {
    pub file: PathBuf,
    /// Tags to extract; read from stdin if none are given
    pub tags: Vec<String>,
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,
    #[command(flatten)]
    pub duplicates: DuplicateArgs,
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ScorefileArgs {
    pub file: PathBuf,
    /// Output table (defaults to FILE with a .csv extension)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct RenameArgs {
    pub file: PathBuf,
    /// New tags, one per entry; read from stdin if none are given
    pub tags: Vec<String>,
}

#[derive(Args)]
pub struct SplitArgs {
    pub file: PathBuf,
    pub ntags: usize,
    #[arg(long)]
    pub prefix: Option<String>,
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,
}

#[derive(Args)]
pub struct SliceArgs {
    pub file: PathBuf,
    /// Tags to copy; read from stdin if none are given
    pub tags: Vec<String>,
    /// Output stream (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub duplicates: DuplicateArgs,
}

#[derive(Args)]
pub struct UpgradeArgs {
    pub file: PathBuf,
    /// Output stream (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_build() {
        let cli = Cli::try_parse_from(["quiver", "build", "a.pdb", "b.pdb", "-o", "all.qv"]).unwrap();
        if let Command::Build(args) = cli.command {
            assert_eq!(args.files.len(), 2);
            assert_eq!(args.output, Some(PathBuf::from("all.qv")));
            assert!(!args.append);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn build_requires_files() {
        assert!(Cli::try_parse_from(["quiver", "build"]).is_err());
    }

    #[test]
    fn append_requires_output() {
        assert!(Cli::try_parse_from(["quiver", "build", "a.pdb", "--append"]).is_err());
        assert!(Cli::try_parse_from(["quiver", "build", "a.pdb", "--append", "-o", "s.qv"]).is_ok());
    }

    #[test]
    fn parse_ls() {
        let cli = Cli::try_parse_from(["quiver", "ls", "s.qv"]).unwrap();
        assert!(matches!(cli.command, Command::Ls(_)));
    }

    #[test]
    fn parse_extract_specific() {
        let cli = Cli::try_parse_from([
            "quiver", "extract-specific", "s.qv", "x", "y", "--all", "-o", "out",
        ])
        .unwrap();
        if let Command::ExtractSpecific(args) = cli.command {
            assert_eq!(args.tags, vec!["x", "y"]);
            assert!(args.duplicates.all);
            assert!(!args.duplicates.first);
            assert_eq!(args.output_dir, PathBuf::from("out"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn first_and_all_conflict() {
        assert!(Cli::try_parse_from(["quiver", "slice", "s.qv", "x", "--first", "--all"]).is_err());
    }

    #[test]
    fn parse_split() {
        let cli = Cli::try_parse_from(["quiver", "split", "s.qv", "10", "--prefix", "part"]).unwrap();
        if let Command::Split(args) = cli.command {
            assert_eq!(args.ntags, 10);
            assert_eq!(args.prefix.as_deref(), Some("part"));
            assert_eq!(args.output_dir, PathBuf::from("."));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn split_rejects_non_numeric_batch() {
        assert!(Cli::try_parse_from(["quiver", "split", "s.qv", "ten"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["quiver", "scorefile", "s.qv", "-v", "--config", "q.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("q.toml")));
    }

    #[test]
    fn rename_tags_are_optional() {
        let cli = Cli::try_parse_from(["quiver", "rename", "s.qv"]).unwrap();
        if let Command::Rename(args) = cli.command {
            assert!(args.tags.is_empty());
        } else { panic!("wrong command"); }
    }
}
