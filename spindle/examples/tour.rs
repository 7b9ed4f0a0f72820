//! A walk through spindle's primitives: launch, suspend, async/await, scoped
//! cancellation, errors, dispatchers, channels and flows.
//!
//! Run with `cargo run --example tour`, add `RUST_LOG=spindle=debug` to see
//! the scheduler at work.
use anyhow::{Result, bail};
use spindle::time::{self, sleep, timed};
use spindle::{Channel, Dispatcher, Error, Scope, flow};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

async fn fetch_data() -> Result<String, Error> {
    sleep(Duration::from_secs(1)).await?;
    Ok("Data from server".to_string())
}

async fn fetch_user_data(user_id: u32) -> Result<String, Error> {
    sleep(Duration::from_secs(1)).await?;
    Ok(format!("User{user_id}"))
}

async fn risky_operation(attempt: u32) -> Result<()> {
    sleep(Duration::from_millis(500)).await?;
    if attempt % 2 == 1 {
        bail!("Something went wrong!");
    }
    println!("Operation completed successfully");
    Ok(())
}

fn here() -> String {
    let thread = std::thread::current();
    format!(
        "task {} on thread {}",
        spindle::task::id(),
        thread.name().unwrap_or("<unnamed>")
    )
}

#[spindle::main]
async fn main(scope: Scope) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== spindle tour ===\n");

    println!("1. Basic launch:");
    scope.launch(|_| async {
        sleep(Duration::from_secs(1)).await?;
        println!("Hello from task!");
        Ok::<_, Error>(())
    });
    println!("Main task continues...");
    sleep(Duration::from_millis(1500)).await?;

    println!("\n2. Suspending function:");
    let result = fetch_data().await?;
    println!("Fetched data: {result}");

    println!("\n3. Async/await:");
    let (users, elapsed) = timed(async {
        let users = (1..=3)
            .map(|id| scope.async_(move |_| fetch_user_data(id)))
            .collect::<Vec<_>>();

        let mut names = Vec::with_capacity(users.len());
        for user in users {
            names.push(user.await?);
        }
        Ok::<_, Error>(names)
    })
    .await;
    println!("Users: {}", users?.join(", "));
    println!("Time taken: {}ms", elapsed.as_millis());

    println!("\n4. Scoped job:");
    let job = scope
        .builder()
        .name("worker")
        .dispatcher(Dispatcher::Io)
        .launch(|_| async {
            for i in 0..5 {
                println!("Working in scope: {i}");
                sleep(Duration::from_millis(500)).await?;
            }
            Ok::<_, Error>(())
        });
    sleep(Duration::from_secs(2)).await?;
    job.cancel();
    if let Err(Error::Cancelled) = job.join().await {
        println!("Job cancelled: {}", job.status());
    }

    println!("\n5. Error handling:");
    for attempt in 0..2 {
        let op = scope.async_(move |_| risky_operation(attempt));
        if let Err(err) = op.await {
            match err.as_failure() {
                Some(failure) => println!("Caught error: {}", failure.error()),
                None => println!("Caught error: {err}"),
            }
        }
    }

    println!("\n6. Dispatchers:");
    for dispatcher in [Dispatcher::Default, Dispatcher::Io, Dispatcher::Unconfined] {
        scope.builder().dispatcher(dispatcher).launch(move |_| async move {
            println!("Running on {dispatcher} dispatcher: {}", here());
            Ok::<_, Error>(())
        });
    }
    sleep(Duration::from_secs(1)).await?;

    println!("\n7. Channel:");
    let channel = Channel::unbounded();
    let tx = channel.clone();
    scope.launch(move |_| async move {
        for i in 0..3 {
            tx.send(format!("Message {i}")).await?;
            sleep(Duration::from_millis(500)).await?;
        }
        tx.close();
        Ok::<_, Error>(())
    });
    while let Some(message) = channel.recv().await? {
        println!("Received: {message}");
    }

    println!("\n8. Flow:");
    let values = flow(|emitter| async move {
        for i in 0..5 {
            emitter.emit(format!("Flow value {i}")).await?;
            sleep(Duration::from_millis(300)).await?;
        }
        Ok::<_, Error>(())
    });
    values.collect(|value| println!("Flow emitted: {value}")).await?;

    println!("\n=== All examples completed in {:?} ===", time::now()?);
    Ok(())
}
