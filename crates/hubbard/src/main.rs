use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hubbard::{
    Config,
    config::Queue as QueueType,
    lr::{Campaign, Status, UCALC},
};
use pwqs::queue::{Queue, local::Local, pbs::Pbs, slurm::Slurm};

/// linear-response Hubbard U calculations with pw.x
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    step: Step,

    /// input file
    #[arg(
        short,
        long,
        global = true,
        default_value_t = String::from("hubbard.toml")
    )]
    config: String,

    /// Write inputs and submission scripts without submitting them. Defaults
    /// to false.
    #[arg(short = 'n', long, global = true, default_value_t = false)]
    dry_run: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Step {
    /// Print the canonical atom order, the perturbations, and their tags
    Order,

    /// Write and submit the self-consistent calculation for each perturbed
    /// atom
    Scf,

    /// Write and submit the perturbed calculations. Every SCF calculation
    /// must be complete
    Pert,

    /// Collect the occupations into the r.x inputs under Ucalc
    Calc,

    /// Run r.x and report the U values
    Solve,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config))?;
    log::debug!("{config}");
    let r = config.resources.clone();
    let template = config.queue_template.clone();
    match config.queue {
        QueueType::Pbs => {
            run(&Pbs::new(r, config.sleep_int, template), &config, &args)
        }
        QueueType::Slurm => {
            run(&Slurm::new(r, config.sleep_int, template)?, &config, &args)
        }
        QueueType::Local => run(&Local::new(r, template), &config, &args),
    }
}

fn run<Q: Queue>(
    queue: &Q,
    config: &Config,
    args: &Args,
) -> anyhow::Result<()> {
    let campaign = Campaign::new(config, queue, ".").dry_run(args.dry_run);
    match args.step {
        Step::Order => print!("{}", campaign.order()?),
        Step::Scf => report("scf", &campaign.run_scf()?),
        Step::Pert => report("pert", &campaign.run_perts()?),
        Step::Calc => {
            campaign.calc_us()?;
            println!("r.x inputs written to {UCALC}");
        }
        Step::Solve => {
            let solution = campaign.solve()?;
            print!("{solution}");
            println!(
                "results written to {}",
                Path::new(UCALC).join("u.json").display()
            );
        }
    }
    Ok(())
}

fn report(step: &str, statuses: &[Status]) {
    for (i, status) in statuses.iter().enumerate() {
        let msg = match status {
            Status::Complete => "complete".to_owned(),
            Status::Queued => "still queued".to_owned(),
            Status::Written => "written".to_owned(),
            Status::Submitted(ids) => format!("submitted {}", ids.join(" ")),
        };
        println!("{step} {}: {msg}", i + 1);
    }
}
