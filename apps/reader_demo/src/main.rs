mod surface;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use reader_core::{
    load_settings, load_settings_from, EventSubscription, InteractionThread, ReaderController,
    TapRegion,
};
use shared::{
    domain::{BookMetadata, ColorScheme, CommandId, Locator, Theme, TocEntry},
    protocol::{ReaderCommand, ReaderEvent},
};
use surface::SimulatedSurface;
use tracing::info;

/// Drives a reader controller against a simulated surface and prints every event as JSON.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value_t = 3)]
    chapters: usize,
    #[arg(long, default_value_t = 3)]
    pages_per_chapter: u32,
    /// Detach the surface halfway through and recover with a refresh.
    #[arg(long)]
    detach_midway: bool,
    #[arg(long)]
    config: Option<PathBuf>,
}

fn demo_book(chapters: usize) -> BookMetadata {
    BookMetadata {
        id: "urn:uuid:reader-demo".into(),
        title: "Demo Book".into(),
        start_locator: Locator::index(0, 0.0),
        table_of_contents: (1..=chapters)
            .map(|i| TocEntry {
                title: format!("Chapter {i}"),
                href: format!("text/chapter{i:02}.xhtml"),
            })
            .collect(),
    }
}

/// Prints events until command `id` has terminated.
async fn drain_until(events: &mut EventSubscription, id: CommandId) -> Result<()> {
    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if let ReaderEvent::Command(command) = &event {
            if command.is_terminal() && command.id() == id {
                return Ok(());
            }
        }
    }
    bail!("event bus closed before command {} finished", id.0)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    if args.chapters == 0 {
        bail!("--chapters must be at least 1");
    }

    let settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    let ui = InteractionThread::spawn("reader-ui")?;
    let controller = ReaderController::open(
        demo_book(args.chapters),
        Theme::default(),
        ui.clone(),
        &settings,
    )?;
    let mut events = controller.subscribe();

    controller.attach_surface(Box::new(SimulatedSurface::new(args.pages_per_chapter)));
    controller.submit(ReaderCommand::Refresh);
    let start = controller.book().start_locator.clone();
    controller.submit(ReaderCommand::OpenChapter(start));
    let last = controller.submit(ReaderCommand::BookmarkCreate);
    drain_until(&mut events, last).await?;

    // Inbound gestures travel through the same queue as commands.
    let callbacks = controller.surface_callbacks();
    callbacks.on_tapped(TapRegion::Right);
    callbacks.on_link_selected("https://example.org/about");

    let turns = args.pages_per_chapter.max(1) as usize;
    let mut last = CommandId(0);
    for _ in 0..turns {
        last = controller.submit(ReaderCommand::OpenPageNext);
    }
    drain_until(&mut events, last).await?;

    if args.detach_midway {
        controller.detach_surface();
        let failed = controller.submit(ReaderCommand::OpenPageNext);
        drain_until(&mut events, failed).await?;

        controller.attach_surface(Box::new(SimulatedSurface::new(args.pages_per_chapter)));
        let refreshed = controller.submit(ReaderCommand::Refresh);
        drain_until(&mut events, refreshed).await?;
    }

    let sepia = Theme {
        color_scheme: ColorScheme::DarkTextOnSepia,
        text_size: 1.25,
        ..Theme::default()
    };
    controller.submit(ReaderCommand::ThemeSet(sepia));
    let last = controller.submit(ReaderCommand::OpenPagePrevious);
    drain_until(&mut events, last).await?;

    if let Some(position) = controller.position_now() {
        info!(
            chapter = position.chapter_href(),
            percent = position.book_progress_percent(),
            bookmarks = controller.bookmarks_now().len(),
            "finished reading session"
        );
    }

    controller.close().await;
    ui.dispose();
    Ok(())
}
