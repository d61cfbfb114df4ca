use clap::Parser;
use ingestkit::{
    app::{llm::fake::FakeLlm, source::fs::FsEntryStore},
    config::{Backend, Command, StartArgs},
    core::{
        cancel::CancelToken,
        llm::{
            stream_to_writer, with_max_tokens, with_model, with_stop_words, with_temperature,
            CallOption, GenerateOptions, Llm, Request,
        },
        source::{DirectoryLoader, Source},
    },
    error::IngestError,
    map_err,
};
use std::io::Write;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    let args = StartArgs::parse();
    args.init_tracing();

    let cancel = CancelToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    if let Err(e) = run(&args, &cancel).await {
        e.print();
        std::process::exit(1);
    }
}

async fn run(args: &StartArgs, cancel: &CancelToken) -> Result<(), IngestError> {
    match &args.command {
        Command::Load {
            root,
            encoding,
            exclude,
            ..
        } => {
            let mut loader = DirectoryLoader::new(FsEntryStore::new(), root.as_str());

            if let Some(encoding) = encoding {
                loader = loader.with_encoding(encoding);
            }

            for prefix in exclude.iter() {
                loader = loader.with_excluded_prefix(prefix);
            }

            let records = match args.command.chunk_config()? {
                Some(config) => {
                    let chunker = config.build()?;
                    loader.load_and_split(cancel, chunker.as_ref()).await?
                }
                None => loader.load(cancel).await?,
            };

            info!("Loaded {} record(s) from {root}", records.len());

            let mut stdout = std::io::stdout().lock();
            for record in records.iter() {
                let line = map_err!(serde_json::to_string(record));
                map_err!(writeln!(stdout, "{line}"));
            }

            Ok(())
        }
        Command::Complete {
            prompt,
            backend,
            temperature,
            stop,
            max_tokens,
            stream,
        } => {
            let llm = llm(args, *backend)?;

            let mut options: Vec<CallOption> = vec![];
            if let Some(model) = args.model() {
                options.push(with_model(model));
            }
            if let Some(temperature) = temperature {
                options.push(with_temperature(*temperature));
            }
            if !stop.is_empty() {
                options.push(with_stop_words(stop.iter().cloned()));
            }
            if let Some(max_tokens) = max_tokens {
                options.push(with_max_tokens(*max_tokens));
            }

            let options = GenerateOptions::resolve(options);
            let request = Request::prompt(prompt.as_str());

            let completion = if *stream {
                let completion = stream_to_writer(
                    llm.as_ref(),
                    cancel,
                    &request,
                    &options,
                    &mut std::io::stdout(),
                )
                .await?;
                println!();
                completion
            } else {
                let completion = llm.generate(cancel, &request, &options).await?;
                println!("{}", completion.text);
                completion
            };

            if completion.is_cancelled() {
                warn!("Generation cancelled, output is partial");
            }

            Ok(())
        }
    }
}

fn llm(args: &StartArgs, backend: Backend) -> Result<Box<dyn Llm>, IngestError> {
    Ok(match backend {
        Backend::Fake => Box::new(FakeLlm::default()),

        #[cfg(feature = "openai")]
        Backend::Openai => Box::new(
            ingestkit::app::llm::openai::OpenAiChat::new(&args.openai_key()?)
                .with_endpoint(&args.openai_endpoint()),
        ),

        #[cfg(feature = "ollama")]
        Backend::Ollama => Box::new(ingestkit::app::llm::ollama::Ollama::new(
            &args.ollama_url(),
        )),
    })
}
