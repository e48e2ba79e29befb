use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use citedoc_core::render::RenderOutcome;
use citedoc_core::{
    AnswerResponse, Citation, Config, ExtractOptions, Library, PageRenderer, SqliteStore,
    config_file, extract_text,
};
use citedoc_pdf_mupdf::MupdfEngine;

mod output;

use output::ColorMode;

/// citedoc - build a local PDF library and jump straight to cited pages
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Library directory (overrides CITEDOC_LIBRARY and the config file)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the page-tagged text of a PDF without adding it to the library
    Extract {
        /// Path to the PDF
        file_path: PathBuf,

        /// Maximum number of pages to extract
        #[arg(long)]
        max_pages: Option<u32>,

        /// Write the text to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract a PDF and add it to the library
    Add {
        /// Path to the PDF
        file_path: PathBuf,

        /// Name to store the document under (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// List the documents in the library
    List,

    /// Remove a document from the library
    Remove {
        /// Document id, as shown by `list`
        id: String,
    },

    /// Remove every document from the library
    Clear,

    /// Resolve a cited document name against the library
    Resolve {
        /// Document name as it appears in an answer
        hint: String,

        /// Cited page
        #[arg(long)]
        page: Option<u32>,
    },

    /// Render a cited page to a PNG file
    Render {
        /// Document name as it appears in an answer
        hint: String,

        /// Page to render (clamped to the document)
        #[arg(long)]
        page: Option<u32>,

        /// Zoom scale (defaults to the configured viewer scale)
        #[arg(long)]
        scale: Option<f32>,

        /// Display pixel density
        #[arg(long)]
        dpr: Option<f32>,

        /// Output PNG path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Resolve every citation in a saved answer JSON file
    Cite {
        /// Path to `{"answer": ..., "citations": [...]}` JSON
        answer_path: PathBuf,
    },

    /// Print the answer-service request for a question as JSON
    Request {
        /// The question to ask about the library
        question: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_file(&config_file::load_config());
    let color = ColorMode(!cli.no_color);

    match cli.command {
        Command::Extract {
            file_path,
            max_pages,
            output,
        } => {
            let options = max_pages.map(ExtractOptions::new).unwrap_or(config.extraction);
            extract(&file_path, options, output, color).await
        }
        Command::Add { file_path, name } => {
            let mut library = open_library(cli.library, &config)?;
            add(&mut library, &file_path, name, &config, color).await
        }
        Command::List => {
            let library = open_library(cli.library, &config)?;
            output::print_documents(&mut std::io::stdout(), library.documents(), color)?;
            Ok(())
        }
        Command::Remove { id } => {
            let mut library = open_library(cli.library, &config)?;
            match library.remove(&id)? {
                Some(doc) => println!("Removed {} ({})", doc.name, doc.id),
                None => anyhow::bail!("No document with id {}", id),
            }
            Ok(())
        }
        Command::Clear => {
            let mut library = open_library(cli.library, &config)?;
            let count = library.len();
            library.clear()?;
            println!("Removed {} document(s)", count);
            Ok(())
        }
        Command::Resolve { hint, page } => {
            let library = open_library(cli.library, &config)?;
            let mut citation = Citation::new(hint, "");
            citation.page = page;
            let result = library.resolve(&citation);
            output::print_resolution(
                &mut std::io::stdout(),
                &citation,
                result.as_ref().copied(),
                color,
            )?;
            if result.is_err() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Render {
            hint,
            page,
            scale,
            dpr,
            output,
        } => {
            let library = open_library(cli.library, &config)?;
            let mut citation = Citation::new(hint, "");
            citation.page = page;
            let scale = scale.unwrap_or(config.viewer.default_scale);
            let dpr = dpr.unwrap_or(config.viewer.device_pixel_ratio);
            render(&library, &citation, scale, dpr, &output, color).await
        }
        Command::Cite { answer_path } => {
            let library = open_library(cli.library, &config)?;
            cite(&library, &answer_path, color)
        }
        Command::Request { question } => {
            let library = open_library(cli.library, &config)?;
            let request = library.answer_request(question);
            println!("{}", serde_json::to_string_pretty(&request)?);
            Ok(())
        }
    }
}

/// Resolve the library directory: CLI flag > env var > config file > platform default.
fn open_library(flag: Option<PathBuf>, config: &Config) -> anyhow::Result<Library<SqliteStore>> {
    let path = flag
        .or_else(|| std::env::var("CITEDOC_LIBRARY").ok().map(PathBuf::from))
        .or_else(|| config.library_path());
    let Some(path) = path else {
        anyhow::bail!(
            "Could not determine a library directory. Pass --library <dir> or set CITEDOC_LIBRARY."
        );
    };

    tracing::debug!(path = %path.display(), "opening library");
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open library at {}", path.display()))?;
    Ok(Library::load(store)?)
}

fn read_pdf(path: &Path) -> anyhow::Result<Vec<u8>> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn extract(
    file_path: &Path,
    options: ExtractOptions,
    output: Option<PathBuf>,
    color: ColorMode,
) -> anyhow::Result<()> {
    let bytes = read_pdf(file_path)?;
    let extracted = extract_text(&MupdfEngine::new(), &bytes, options).await?;

    let mut writer: Box<dyn Write> = if let Some(ref output_path) = output {
        Box::new(std::fs::File::create(output_path)?)
    } else {
        Box::new(std::io::stdout())
    };
    writeln!(writer, "{}", extracted.text)?;

    let color = ColorMode(color.enabled() && output.is_none());
    output::print_extraction_summary(
        &mut std::io::stderr(),
        &display_name(file_path),
        &extracted,
        color,
    )?;
    Ok(())
}

async fn add(
    library: &mut Library<SqliteStore>,
    file_path: &Path,
    name: Option<String>,
    config: &Config,
    color: ColorMode,
) -> anyhow::Result<()> {
    let bytes = read_pdf(file_path)?;
    let name = name.unwrap_or_else(|| display_name(file_path));

    let doc = library
        .upload(&MupdfEngine::new(), name.clone(), bytes, config.extraction)
        .await
        .with_context(|| format!("Could not add {}", name))?;

    let mut out = std::io::stdout();
    if color.enabled() {
        use owo_colors::OwoColorize;
        writeln!(out, "{} {} ({})", "Added".green(), doc.name.bold(), doc.id)?;
    } else {
        writeln!(out, "Added {} ({})", doc.name, doc.id)?;
    }
    Ok(())
}

async fn render(
    library: &Library<SqliteStore>,
    citation: &Citation,
    scale: f32,
    dpr: f32,
    output_path: &Path,
    color: ColorMode,
) -> anyhow::Result<()> {
    let target = library.view_target(citation)?;
    let mut renderer = PageRenderer::new(Rc::new(MupdfEngine::new())).with_device_pixel_ratio(dpr);
    let total_pages = renderer.open(&target.raw_bytes, target.page).await?;
    let task = renderer.render_page(target.page, scale)?;

    // Dropping the task on Ctrl+C cancels the render.
    let outcome = tokio::select! {
        outcome = task.into_future() => outcome?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("Render interrupted"),
    };

    let RenderOutcome::Rendered { page, layout } = outcome else {
        anyhow::bail!("Render of {} was superseded", target.document_name);
    };

    let surface = renderer.surface();
    let image = image::RgbaImage::from_raw(
        layout.pixel_width,
        layout.pixel_height,
        surface.pixels.clone(),
    )
    .context("Rendered surface does not match its reported size")?;
    drop(surface);
    image
        .save(output_path)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    output::print_rendered(
        &mut std::io::stdout(),
        &target.document_name,
        page,
        total_pages,
        &layout,
        output_path,
        color,
    )?;
    renderer.close();
    Ok(())
}

fn cite(library: &Library<SqliteStore>, answer_path: &Path, color: ColorMode) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(answer_path)
        .with_context(|| format!("Failed to read {}", answer_path.display()))?;
    let response = AnswerResponse::from_json(&json)
        .with_context(|| format!("{} is not a valid answer", answer_path.display()))?;

    let mut out = std::io::stdout();
    writeln!(out, "{}", response.answer)?;
    writeln!(out)?;

    let citations = response.citations();
    if citations.is_empty() {
        writeln!(out, "No citations.")?;
        return Ok(());
    }

    let mut missing = 0;
    for citation in &citations {
        let result = library.resolve(citation);
        if result.is_err() {
            missing += 1;
        }
        output::print_resolution(&mut out, citation, result.as_ref().copied(), color)?;
    }

    if missing > 0 {
        writeln!(out)?;
        writeln!(
            out,
            "{} of {} citation(s) could not be matched to a library document",
            missing,
            citations.len()
        )?;
    }
    Ok(())
}
