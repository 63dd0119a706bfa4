//! `shotline resolve`: where an output of a context lands.

use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use clap::Args;
use serde::Serialize;

use shotline_core::{NamingRules, OutputKind, TechnicalSpec, VersionSlot};
use shotline_resolver::OutputTarget;
use shotline_sync::next_version;

use super::{naming_rules, print_json, production, resolver};
use crate::{ContextArgs, GlobalArgs};

#[derive(Args, Debug)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Managed file to detect the context from.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Output kind: preview | final.
    #[arg(long, default_value = "final")]
    pub kind: OutputKind,

    /// Version to resolve. Defaults to the next free version on disk.
    #[arg(long = "version-number", short = 'n', value_name = "N")]
    pub version: Option<u32>,

    #[arg(long, default_value = "WIP")]
    pub state: String,

    /// Resolve a single frame instead of the node path.
    #[arg(long)]
    pub frame: Option<i64>,

    /// Frame range used instead of the shot spec from the daemon.
    #[arg(long, value_name = "START-END")]
    pub range: Option<String>,

    /// Do not contact the daemon: default naming rules, `--range` required.
    #[arg(long, requires = "range")]
    pub offline: bool,
}

#[derive(Serialize)]
struct ResolveJson {
    context: String,
    kind: String,
    version: u32,
    state: String,
    path: PathBuf,
    movie: bool,
    frames: usize,
}

fn parse_range(range: &str) -> Result<(i64, i64)> {
    let (start, end) = range
        .split_once('-')
        .filter(|(start, _)| !start.is_empty())
        .with_context(|| format!("invalid range '{range}', expected START-END"))?;
    let start = start.trim().parse().with_context(|| format!("invalid start frame in '{range}'"))?;
    let end = end.trim().parse().with_context(|| format!("invalid end frame in '{range}'"))?;
    if end < start {
        bail!("range '{range}' ends before it starts");
    }
    Ok((start, end))
}

impl ResolveArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.config()?;
        let ctx = self.context.resolve(self.file.as_deref())?;
        let resolver = resolver(&config);

        let (spec, rules) = if self.offline {
            (range_spec(self.range.as_deref())?, NamingRules::default())
        } else {
            let db = production(&config);
            let spec = match self.range.as_deref() {
                Some(range) => range_spec(Some(range))?,
                None => db
                    .technical_spec(&ctx)
                    .with_context(|| format!("failed to fetch the technical spec of {ctx}"))?,
            };
            (spec, naming_rules(&db, &ctx)?)
        };

        let version = match self.version {
            Some(version) => version,
            None => {
                let root = resolver.publish_root(&ctx)?;
                next_version(&root)
                    .with_context(|| format!("failed to scan {}", root.display()))?
            }
        };
        let slot = VersionSlot::new(version, self.state.clone());

        let path = resolver
            .resolve(&ctx, &spec, &rules, self.kind, &slot, self.frame)
            .with_context(|| format!("cannot resolve the {} output of {ctx}", self.kind))?;
        let target = resolver.output_target(&ctx, &spec, &rules, self.kind, &slot)?;
        let movie = matches!(target, OutputTarget::Movie(_));
        let frames = if movie { 1 } else { spec.frame_count() as usize };

        if global.json {
            return print_json(&ResolveJson {
                context: ctx.to_string(),
                kind: self.kind.to_string(),
                version,
                state: self.state,
                path,
                movie,
                frames,
            });
        }
        println!("{}", path.display());
        Ok(())
    }
}

fn range_spec(range: Option<&str>) -> Result<TechnicalSpec> {
    let range = range.context("--range is required")?;
    let (start_frame, end_frame) = parse_range(range)?;
    Ok(TechnicalSpec {
        width: 0,
        height: 0,
        pixel_aspect: 1.0,
        fps: 0.0,
        start_frame,
        end_frame,
    })
}
