//! A feed screen driven by a view model
//!
//! Simulates a host UI: a screen lifecycle that starts and stops, a
//! background page load, and a frame loop draining the invalidate queue.
//!
//! Run with `VIEW_STATE_LOG_MODE=debug cargo run -p view-state --example article_feed`
//! to see every state transition.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use view_state::prelude::*;
use view_state::{append_at, init_logging_from_env, InvalidationGate};

#[derive(Clone, Debug, PartialEq)]
struct FeedState {
    articles: Vec<String>,
    request: Async<Vec<String>>,
}

impl_state!(FeedState { articles, request });

struct FeedScreen {
    vm: Arc<ViewModel<FeedState>>,
    lifecycle: Arc<Lifecycle>,
    gate: InvalidationGate,
}

impl StateView for FeedScreen {
    fn view_id(&self) -> &str {
        "feed_screen"
    }

    fn invalidate(&self) {
        let state = self.vm.state();
        match &state.request {
            Async::Loading(_) => println!("[render] loading... ({} shown)", state.articles.len()),
            Async::Fail { message, .. } => println!("[render] error: {message}"),
            _ => println!("[render] {} articles: {:?}", state.articles.len(), state.articles),
        }
    }

    fn activity(&self) -> Arc<dyn ActivitySource> {
        self.lifecycle.clone()
    }

    fn invalidation_gate(&self) -> &InvalidationGate {
        &self.gate
    }
}

fn fetch_page(page: usize) -> Result<Vec<String>, String> {
    thread::sleep(Duration::from_millis(50));
    if page > 2 {
        return Err("no more pages".into());
    }
    Ok((0..3).map(|n| format!("article {}", page * 3 + n)).collect())
}

fn load_page(vm: &ViewModel<FeedState>, page: usize) -> thread::JoinHandle<()> {
    let offset = page * 3;
    vm.execute(
        move || fetch_page(page),
        move |state, request| FeedState {
            articles: request
                .value()
                .map(|fetched| append_at(&state.articles, fetched, offset))
                .unwrap_or_else(|| state.articles.clone()),
            request,
        },
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;

    let vm = Arc::new(ViewModel::new(
        FeedState { articles: Vec::new(), request: Async::Uninitialized },
        StoreConfig::from_env().with_name("feed"),
    ));
    let _logging = vm.log_state_changes()?;

    let screen = Arc::new(FeedScreen {
        vm: Arc::clone(&vm),
        lifecycle: Arc::new(Lifecycle::new()),
        gate: InvalidationGate::new(),
    });
    let queue = Arc::new(InvalidateQueue::new());
    bind_view(&vm, Arc::clone(&screen), Arc::clone(&queue))?;

    // One-shot notice: shown once per distinct failure, not on every start
    vm.subscribe(
        Some(screen.activity()),
        screen.unique_only(Some("error_toast")),
        |state: &FeedState| {
            if let Some(message) = state.request.error() {
                println!("[toast] {message}");
            }
        },
    )?;

    screen.lifecycle.start();
    queue.run_pending();

    for page in 0..4 {
        load_page(&vm, page).join().map_err(|_| "page load panicked")?;
        queue.run_pending();
    }

    // Backgrounded and restored: the feed re-renders, the toast does not repeat
    screen.lifecycle.stop();
    screen.lifecycle.start();
    queue.run_pending();

    screen.lifecycle.destroy();
    vm.clear();
    Ok(())
}
