use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;

use fia_estimator::schema::tables;
use fia_estimator::synthetic::write_parquet;
use fia_estimator::{
    BiomassComponent, DensityMeasure, EstimationOptions, EstimationResult, Estimator,
    EstimatorConfig, LandType, ParquetStore, RandomInventory, TableCache, TableSource,
    TemporalMeasure, TreeType, VolumeType, prefetch_tables,
};

#[derive(Parser, Debug)]
#[command(
    name = "fia-estimator",
    version,
    about = "Design-based population estimates from forest inventory Parquet tables"
)]
struct Cli {
    /// Directory holding one Parquet file (or directory of files) per table
    #[arg(long, short, env = "FIA_DATA", global = true, default_value = ".")]
    data: PathBuf,

    /// JSON estimator configuration; absent fields keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Read every table into memory up front with the async reader
    #[arg(long, global = true)]
    prefetch: bool,

    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the evaluations in the inventory
    Evaluations,
    /// Percent of the land base in the area domain
    Area(CommonArgs),
    /// Volume per acre
    Volume {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, value_enum, default_value_t = VolumeArg::Net)]
        volume_type: VolumeArg,
    },
    /// Biomass per acre, in tons
    Biomass {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, value_enum, default_value_t = BiomassArg::Aboveground)]
        component: BiomassArg,
    },
    /// Trees or basal area per acre
    Tpa {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long)]
        basal_area: bool,
    },
    /// Net annual growth
    Growth(TemporalArgs),
    /// Annual mortality
    Mortality(TemporalArgs),
    /// Annual removals
    Removals(TemporalArgs),
    /// Write a seeded random inventory to the data directory
    Generate {
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, value_delimiter = ',', default_value = "1")]
        states: Vec<i64>,
        #[arg(long, default_value_t = 3)]
        strata: usize,
        #[arg(long, default_value_t = 8)]
        plots_per_stratum: usize,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Evaluation id; otherwise the most recent evaluation of the right type
    #[arg(long)]
    evalid: Option<i64>,
    /// State codes restricting automatic evaluation selection
    #[arg(long, value_delimiter = ',')]
    states: Vec<i64>,
    /// Grouping columns, e.g. SPCD,FORTYPCD
    #[arg(long, value_delimiter = ',')]
    group_by: Vec<String>,
    #[arg(long)]
    plot_domain: Option<String>,
    #[arg(long)]
    area_domain: Option<String>,
    #[arg(long)]
    tree_domain: Option<String>,
    #[arg(long, value_enum, default_value_t = LandArg::Forest)]
    land_type: LandArg,
    #[arg(long, value_enum, default_value_t = TreeArg::Live)]
    tree_type: TreeArg,
    /// Also report population totals
    #[arg(long)]
    totals: bool,
}

#[derive(Args, Debug)]
struct TemporalArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, value_enum, default_value_t = TemporalArg::Volume)]
    measure: TemporalArg,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LandArg {
    Forest,
    Timber,
    All,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TreeArg {
    Live,
    Dead,
    Gs,
    All,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VolumeArg {
    Net,
    Gross,
    Sound,
    Sawlog,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BiomassArg {
    Aboveground,
    Belowground,
    Bole,
    Total,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TemporalArg {
    Volume,
    Biomass,
    Trees,
}

impl CommonArgs {
    fn options(&self) -> EstimationOptions {
        let land_type = match self.land_type {
            LandArg::Forest => LandType::Forest,
            LandArg::Timber => LandType::Timber,
            LandArg::All => LandType::All,
        };
        let tree_type = match self.tree_type {
            TreeArg::Live => TreeType::Live,
            TreeArg::Dead => TreeType::Dead,
            TreeArg::Gs => TreeType::GrowingStock,
            TreeArg::All => TreeType::All,
        };
        EstimationOptions {
            evalid: self.evalid,
            states: self.states.clone(),
            grouping: self.group_by.clone(),
            plot_domain: self.plot_domain.clone(),
            area_domain: self.area_domain.clone(),
            tree_domain: self.tree_domain.clone(),
            land_type,
            tree_type,
            totals: self.totals,
            plot_ids: None,
        }
    }
}

impl From<TemporalArg> for TemporalMeasure {
    fn from(arg: TemporalArg) -> Self {
        match arg {
            TemporalArg::Volume => Self::Volume,
            TemporalArg::Biomass => Self::Biomass,
            TemporalArg::Trees => Self::Trees,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EstimatorConfig> {
    let config = match path {
        Some(path) => EstimatorConfig::from_json_file(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?,
        None => EstimatorConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn open_source(cli: &Cli, config: &EstimatorConfig) -> Result<Box<dyn TableSource>> {
    let store = ParquetStore::open(&cli.data)
        .with_context(|| format!("Failed to open inventory at {}", cli.data.display()))?
        .with_batch_size(config.batch_size);
    if !cli.prefetch {
        return Ok(Box::new(store));
    }
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let memory = runtime
        .block_on(prefetch_tables(&store, &tables::ALL))
        .context("Failed to prefetch inventory tables")?;
    Ok(Box::new(memory))
}

fn print_result(result: &EstimationResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{result}"),
        OutputFormat::Json => println!("{}", result.to_json()?),
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let start = Instant::now();

    if let Command::Generate {
        seed,
        states,
        strata,
        plots_per_stratum,
    } = &cli.command
    {
        let shape = RandomInventory {
            seed: *seed,
            states: states.clone(),
            strata_per_state: *strata,
            plots_per_stratum: *plots_per_stratum,
            ..RandomInventory::default()
        };
        let store = shape.build()?;
        write_parquet(&store, &cli.data)
            .with_context(|| format!("Failed to write inventory to {}", cli.data.display()))?;
        info!("Wrote synthetic inventory to {} in {:?}", cli.data.display(), start.elapsed());
        return Ok(());
    }

    let config = load_config(cli.config.as_ref())?;
    let source = open_source(&cli, &config)?;
    let estimator = Estimator::new(source.as_ref(), &config);
    let mut cache = TableCache::new();

    let result = match &cli.command {
        Command::Evaluations => {
            let evaluations = estimator.evaluations()?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&evaluations)?),
                OutputFormat::Text => {
                    for e in &evaluations {
                        let types: Vec<&str> = e.types.iter().map(|t| t.code()).collect();
                        println!(
                            "{:>8}  state {:>3}  {}  [{}]",
                            e.evalid,
                            e.statecd.map_or_else(|| "-".to_string(), |s| s.to_string()),
                            e.description.as_deref().unwrap_or(""),
                            types.join(", ")
                        );
                    }
                }
            }
            return Ok(());
        }
        Command::Area(common) => estimator.area(&common.options(), &mut cache)?,
        Command::Volume {
            common,
            volume_type,
        } => {
            let volume_type = match volume_type {
                VolumeArg::Net => VolumeType::Net,
                VolumeArg::Gross => VolumeType::Gross,
                VolumeArg::Sound => VolumeType::Sound,
                VolumeArg::Sawlog => VolumeType::Sawlog,
            };
            estimator.volume(&common.options(), volume_type, &mut cache)?
        }
        Command::Biomass { common, component } => {
            let component = match component {
                BiomassArg::Aboveground => BiomassComponent::Aboveground,
                BiomassArg::Belowground => BiomassComponent::Belowground,
                BiomassArg::Bole => BiomassComponent::Bole,
                BiomassArg::Total => BiomassComponent::Total,
            };
            estimator.biomass(&common.options(), component, &mut cache)?
        }
        Command::Tpa { common, basal_area } => {
            let measure = if *basal_area {
                DensityMeasure::BasalArea
            } else {
                DensityMeasure::TreesPerAcre
            };
            estimator.tpa(&common.options(), measure, &mut cache)?
        }
        Command::Growth(args) => estimator.growth(&args.common.options(), args.measure.into(), &mut cache)?,
        Command::Mortality(args) => {
            estimator.mortality(&args.common.options(), args.measure.into(), &mut cache)?
        }
        Command::Removals(args) => {
            estimator.removals(&args.common.options(), args.measure.into(), &mut cache)?
        }
        Command::Generate { .. } => return Ok(()),
    };

    print_result(&result, cli.format)?;
    info!("Estimation completed in {:?}", start.elapsed());
    Ok(())
}
