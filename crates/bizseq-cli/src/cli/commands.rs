use super::config::Command;
use bizseq::{SegmentRow, Sequencer};
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Instant;

/// Executes one subcommand against a running sequencer.
pub async fn run(sequencer: &Arc<Sequencer>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Next { key, count } => {
            for _ in 0..count {
                println!("{}", sequencer.get_next_id(&key).await?);
            }
        }
        Command::Segment { key, size } => {
            let range = sequencer.get_segment(&key, size).await?;
            if range.is_empty() {
                println!("supported={}", range.supported);
            } else {
                println!("{} {}", range.from, range.to);
            }
        }
        Command::Describe { key } => print_row(&sequencer.describe(&key).await?),
        Command::Create {
            key,
            description,
            step,
            max_id,
        } => {
            let row = SegmentRow::new(key.as_str(), step)
                .with_description(description)
                .with_max_id(max_id);
            sequencer.create_key(row).await?;
            print_row(&sequencer.describe(&key).await?);
        }
        Command::InitMaxId { key, start, step } => {
            sequencer.init_max_id(&key, start, step).await?;
            print_row(&sequencer.describe(&key).await?);
        }
        Command::Bench { key, tasks, ids } => bench(sequencer, key, tasks, ids).await?,
    }
    Ok(())
}

fn print_row(row: &SegmentRow) {
    println!("biz_tag:     {}", row.biz_tag);
    println!("max_id:      {}", row.max_id);
    println!("step:        {}", row.step);
    println!("description: {}", row.description);
    println!("update_time: {}", row.update_time);
}

/// Draws `ids` ids from each of `tasks` concurrent tasks sharing `key`.
async fn bench(
    sequencer: &Arc<Sequencer>,
    key: String,
    tasks: usize,
    ids: usize,
) -> anyhow::Result<()> {
    let key: Arc<str> = key.into();
    let start = Instant::now();

    let handles = (0..tasks.max(1)).map(|_| {
        let sequencer = Arc::clone(sequencer);
        let key = Arc::clone(&key);
        tokio::spawn(async move {
            let mut last = 0;
            for _ in 0..ids {
                let id = sequencer.get_next_id(&key).await?;
                debug_assert!(id > last);
                last = id;
            }
            Ok::<_, bizseq::Error>(last)
        })
    });

    let mut highest = 0;
    for result in try_join_all(handles).await? {
        highest = highest.max(result?);
    }

    let elapsed = start.elapsed();
    let total = tasks.max(1) * ids;
    #[allow(clippy::cast_precision_loss)]
    let rate = total as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!(
        "{total} ids from {} tasks in {elapsed:?} ({rate:.0} ids/s), highest {highest}",
        tasks.max(1)
    );
    Ok(())
}
