use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use base::Error;
use bpaf::Bpaf;
use p1203_core::forest::RandomForest;
use p1203_core::model::{Config, Device, InputReport};
use p1203_core::Session;
use tracing::{debug, error, warn};

/// Evaluates HTTP Adaptive Streaming session reports against ITU-T Rec.
/// P.1203 and prints a JSON object keyed by input filename.
#[derive(Bpaf, Debug)]
#[bpaf(options, version(env!("CARGO_PKG_VERSION")))]
struct Args {
    /// Enable the Amendment 1, Clause 8.2 audiovisual integration fix.
    #[bpaf(long)]
    amendment_1_audiovisual: bool,

    /// Enable the Amendment 1, Clause 8.4 stalling fix.
    #[bpaf(long)]
    amendment_1_stalling: bool,

    /// Use the simplified Amendment 1, Appendix 2 model (O35 = O35_baseline).
    #[bpaf(long)]
    amendment_1_app_2: bool,

    /// Skip the measurement window for audio; less precise and not
    /// standards-conformant.
    #[bpaf(long)]
    fast_mode: bool,

    /// Override the session's display resolution, e.g. "1920x1080".
    #[bpaf(long, argument("WxH"))]
    display_res: Option<String>,

    /// Override the session's device class ("pc" or "mobile").
    #[bpaf(long, argument("DEVICE"))]
    device: Option<String>,

    /// Directory of `tree*.csv` files for the random-forest `O46` correction.
    /// Without this, the blend uses an empty (no-op) forest.
    #[bpaf(long, argument("DIR"))]
    trees: Option<PathBuf>,

    /// One or more input report JSON files.
    #[bpaf(positional("REPORT"))]
    reports: Vec<PathBuf>,
}

impl Args {
    fn config(&self) -> Result<Config, Error> {
        let device = self
            .device
            .as_deref()
            .map(str::parse::<Device>)
            .transpose()?;
        Ok(Config {
            debug: false,
            amendment_1_audiovisual: self.amendment_1_audiovisual,
            amendment_1_stalling: self.amendment_1_stalling,
            amendment_1_app_2: self.amendment_1_app_2,
            fast_mode: self.fast_mode,
            display_res: self.display_res.clone(),
            device,
        })
    }

    fn forest(&self) -> Result<RandomForest, Error> {
        match &self.trees {
            Some(dir) => RandomForest::load_dir(dir),
            None => {
                warn!("no --trees directory given; O46's random-forest term will be 0");
                Ok(RandomForest::empty())
            }
        }
    }

    fn run(self) -> Result<i32, Error> {
        let config = self.config()?;
        let forest = self.forest()?;

        let mut results = BTreeMap::new();
        let mut had_error = false;

        for path in &self.reports {
            let key = path.display().to_string();
            match evaluate_one(path, &config, &forest) {
                Ok(value) => {
                    results.insert(key, value);
                }
                Err(e) => {
                    had_error = true;
                    error!(report = %path.display(), err = %e, "evaluation failed");
                    results.insert(key, serde_json::json!({ "error": e.to_string() }));
                }
            }
        }

        println!("{}", serde_json::to_string_pretty(&results).unwrap());
        Ok(if had_error { 1 } else { 0 })
    }
}

fn evaluate_one(path: &Path, config: &Config, forest: &RandomForest) -> Result<serde_json::Value, Error> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| base::format_err_t!(SchemaError, "reading {}: {}", path.display(), e))?;
    let report: InputReport = serde_json::from_str(&contents)
        .map_err(|e| base::format_err_t!(SchemaError, "parsing {}: {}", path.display(), e))?;
    let session = Session::with_forest(report, config.clone(), forest.clone());
    let result = session.run()?;
    Ok(serde_json::to_value(result).expect("SessionResult always serializes"))
}

fn main() {
    base::tracing_setup::install();

    let progname = std::env::args_os().next().map(PathBuf::from);
    let progname = progname
        .as_deref()
        .and_then(Path::file_name)
        .and_then(OsStr::to_str)
        .unwrap_or(env!("CARGO_PKG_NAME"));

    let args = match args().fallback_to_usage().run_inner(bpaf::Args::current_args().set_name(progname)) {
        Ok(a) => a,
        Err(e) => std::process::exit(e.exit_code()),
    };
    debug!("parsed command-line arguments: {args:#?}");

    match args.run() {
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
        Ok(code) => std::process::exit(code),
    }
}
