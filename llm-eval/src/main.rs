use clap::Parser;
use llm_eval::{EvalParams, OverflowPolicy, Result, TaskInput, TaskKind, source::Sources};
use std::{path::PathBuf, time::Instant};

/// 准备评测任务的数据并遍历其批次
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// 任务名
    #[arg(value_enum)]
    task: TaskKind,
    /// 参数文件（json）
    #[arg(short, long)]
    config: PathBuf,
    #[arg(long)]
    n_ctx: Option<usize>,
    #[arg(long)]
    eval_batch_size: Option<usize>,
    #[arg(long, value_enum)]
    overflow: Option<OverflowPolicy>,
    /// 遍历的轮数
    #[arg(long, default_value_t = 1)]
    passes: usize,
    /// 打印第一个批次
    #[arg(long)]
    show: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("llm_eval=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut params = EvalParams::from_file(&cli.config)?;
    if let Some(n_ctx) = cli.n_ctx {
        params.n_ctx = n_ctx
    }
    if let Some(batch_size) = cli.eval_batch_size {
        params.eval_batch_size = batch_size
    }
    if let Some(overflow) = cli.overflow {
        params.overflow = overflow
    }

    let sources = Sources::remote()?;
    let task = cli.task.task();

    let time = Instant::now();
    let ctx = task.init(&params, &sources)?;
    let info = task.task_info(&ctx);
    println!(
        "{}: {} steps, tokens cached at {} (took {:?})",
        cli.task,
        info.n_steps,
        ctx.tokens_path.display(),
        time.elapsed()
    );

    match task.input(&ctx, &sources)? {
        TaskInput::Windows(stream) => {
            if cli.show {
                println!("{}", stream.bins().as_tensor().rows(0, stream.batch_size()))
            }

            let eos = stream.bins().eos();
            let time = Instant::now();
            let mut scored = 0;
            for batch in stream.take(info.n_steps * cli.passes) {
                scored += batch.targets.iter().filter(|&&t| t != eos).count()
            }
            println!(
                "{} passes, {scored} scored positions (took {:?})",
                cli.passes,
                time.elapsed()
            )
        }
        TaskInput::Prompts(batches) => {
            if cli.show {
                if let Some(batch) = batches.first() {
                    for (key, prompt) in batch.keys.iter().zip(&batch.prompts) {
                        println!("{key}: {} tokens", prompt.len())
                    }
                }
            }
            let n_prompts = batches.iter().map(|b| b.keys.len()).sum::<usize>();
            println!("{n_prompts} prompts in {} batches", batches.len())
        }
    }
    Ok(())
}
