// Example usage of ChunkPipe shared between a producer and a consumer
use chunkpipe::prelude::*;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let pipe: Arc<ChunkPipe<u32>> = Arc::new(
        ChunkPipe::builder()
            .config(
                ChunkPipeConfig::default()
                    .with_index(IndexKind::default())
                    .with_allocator(AllocatorKind::bucketed()),
            )
            .build()?,
    );

    // Bulk pushes become chunks, short ones merge into the tail
    pipe.push(&[1, 2, 3, 4, 5])?.push(&[6])?.push_vec(vec![7, 8, 9]);
    println!("Chunks: {:?}", pipe.chunk_slice());
    println!("Element 6: {:?}", pipe.get(6));

    let producer = {
        let pipe = pipe.clone();
        std::thread::spawn(move || -> Result<(), ChunkPipeErrors> {
            for batch in 0..100u32 {
                let values: Vec<u32> = (batch * 10..batch * 10 + 10).collect();
                pipe.push(&values)?;
            }
            Ok(())
        })
    };

    let mut consumed = 0;
    while consumed < 500 {
        if let Some(value) = pipe.pop_front() {
            consumed += 1;
            if consumed % 100 == 0 {
                println!("Consumed {} values, last was {}", consumed, value);
            }
        } else {
            std::thread::yield_now();
        }
    }
    producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer panicked"))??;

    println!("Left in pipe: {}", pipe.len());
    println!("Back: {:?}", pipe.back());
    println!("First batch: {:?}", pipe.chunk_iter().next());
    println!("Stats: {:?}", pipe.stats());
    Ok(())
}
