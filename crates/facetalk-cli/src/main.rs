use std::fs;
use std::io::{self, BufRead, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facetalk_contracts::chat::{
    parse_command, ChatCommand, ReplyTrigger, VoiceSelector, CHAT_HELP_COMMANDS,
};
use facetalk_contracts::errors::{RESOLUTION_MISS_MESSAGE, SUCCESS_MESSAGE};
use facetalk_contracts::events::EventWriter;
use facetalk_contracts::media::{
    resolve_result_url, GenerationRequest, JobHandle, JobStatus, PlaybackMode, ResolvedMedia,
    SourceImage, VoiceProvider,
};
use facetalk_contracts::prefs::PreferenceStore;
use facetalk_engine::{
    AskRequest, BlobStore, ChatAnswer, ChatBackend, CompletionPoller, DirBlobStore,
    HttpMediaFetcher, HttpTalkApi, JobClient, MediaPlayer, Persona, PipelineOutcome,
    PipelineTicket, PlaybackArbiter, PlaybackRejected, ReplyPipeline, SeedQuestions, Session,
    Settings, Submission, SystemClock, TalkApi, ASK_FAILED_TEXT, TRANSCRIBE_FAILED_TEXT,
};
use serde_json::{json, Value};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "facetalk", version, about = "Talking-head replies for a persona chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one talk and resolve its playable media.
    Talk(TalkArgs),
    /// Read the current status of a talk.
    Status(StatusArgs),
    /// Pick the playable URL out of a status payload.
    Resolve(ResolveArgs),
    /// Interactive chat with video replies.
    Chat(ChatArgs),
}

#[derive(Debug, Parser)]
struct TalkArgs {
    #[arg(long, required_unless_present = "audio_url", conflicts_with = "audio_url")]
    text: Option<String>,
    #[arg(long)]
    audio_url: Option<String>,
    /// Image URL, or a local file that is uploaded first.
    #[arg(long)]
    image: String,
    #[arg(long, default_value = "male")]
    gender: String,
    /// Explicit voice id; overrides the gender mapping.
    #[arg(long)]
    voice: Option<String>,
    #[arg(long, default_value = "microsoft")]
    provider: String,
    #[arg(long)]
    timeout: Option<f64>,
    #[arg(long)]
    interval: Option<f64>,
    #[arg(long, default_value = ".facetalk")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct StatusArgs {
    talk_id: String,
}

#[derive(Debug, Parser)]
struct ResolveArgs {
    /// JSON payload file, or `-` for stdin.
    #[arg(default_value = "-")]
    payload: String,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long, default_value = ".facetalk")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    prefs: Option<PathBuf>,
    /// Origin serving bundled `/static/images/` persona assets.
    #[arg(long)]
    image_origin: Option<String>,
    #[arg(long)]
    no_video: bool,
    /// Voice typed messages back instead of asking a chat backend.
    #[arg(long)]
    echo: bool,
    /// Open resolved media with the system viewer.
    #[arg(long)]
    open: bool,
    /// Refuse sound until the first typed line, like a browser would.
    #[arg(long)]
    strict_autoplay: bool,
    #[arg(long)]
    timeout: Option<f64>,
    #[arg(long)]
    interval: Option<f64>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("facetalk error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Talk(args) => run_talk(args),
        Command::Status(args) => run_status(args),
        Command::Resolve(args) => run_resolve(args),
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
    }
}

/// Everything one invocation talks to, wired from settings.
struct Engine {
    settings: Settings,
    events: EventWriter,
    api: Arc<dyn TalkApi>,
    blobs: Arc<dyn BlobStore>,
    arbiter: Arc<PlaybackArbiter>,
}

impl Engine {
    fn build(settings: Settings, out_dir: &Path, events_path: Option<PathBuf>) -> Result<Self> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let events = EventWriter::new(
            events_path.unwrap_or_else(|| out_dir.join("events.jsonl")),
            uuid::Uuid::new_v4().to_string(),
        );
        let api: Arc<dyn TalkApi> = Arc::new(HttpTalkApi::new(&settings)?);
        let blobs: Arc<dyn BlobStore> = Arc::new(DirBlobStore::new(out_dir.join("media"))?);
        let arbiter = Arc::new(PlaybackArbiter::new(
            Arc::new(HttpMediaFetcher::new(&settings)?),
            blobs.clone(),
            settings.proxy_base.clone(),
            events.clone(),
        ));
        Ok(Self {
            settings,
            events,
            api,
            blobs,
            arbiter,
        })
    }

    fn job_client(&self) -> JobClient {
        JobClient::new(self.api.clone(), self.events.clone())
    }

    fn poller(&self) -> CompletionPoller {
        CompletionPoller::new(
            self.api.clone(),
            Arc::new(SystemClock::default()),
            self.events.clone(),
        )
    }

    fn pipeline(&self) -> ReplyPipeline {
        ReplyPipeline::new(
            self.job_client(),
            self.poller(),
            self.arbiter.clone(),
            self.settings.poll_settings(),
            self.events.clone(),
        )
    }
}

fn run_talk(args: TalkArgs) -> Result<i32> {
    let settings = Settings::from_env().with_poll_overrides(args.timeout, args.interval);
    let engine = Engine::build(settings, &args.out, args.events.clone())?;
    let image = source_image(&args.image)?;
    let request = match (&args.text, &args.audio_url) {
        (_, Some(audio_url)) => GenerationRequest::audio(audio_url.clone(), image),
        (Some(text), None) => {
            let voice = match &args.voice {
                Some(voice_id) => VoiceProvider::new(args.provider.clone(), Some(voice_id.clone())),
                None => VoiceSelector {
                    provider_kind: args.provider.clone(),
                    ..engine.settings.voice_selector()
                }
                .voice_for(Some(args.gender.as_str()), ReplyTrigger::MessageSent),
            };
            GenerationRequest::text(text.clone(), image, voice)
        }
        (None, None) => bail!("either --text or --audio-url is required"),
    };

    let submission = match engine.job_client().submit(&request) {
        Ok(submission) => submission,
        Err(err) => {
            print_json(&json!({"message": err.status_message(), "error": err.kind()}))?;
            return Ok(1);
        }
    };
    let (talk_id, media_url, message, attempts) = match submission {
        Submission::Completed(payload) => match resolve_result_url(&payload) {
            Some(url) => (None, Some(url), SUCCESS_MESSAGE.to_string(), 0),
            None => (None, None, RESOLUTION_MISS_MESSAGE.to_string(), 0),
        },
        Submission::Pending(handle) => {
            let report = engine
                .poller()
                .await_completion(&handle, engine.settings.poll_settings());
            (
                Some(handle.id().to_string()),
                report.media_url,
                report.message,
                report.attempts,
            )
        }
    };

    let playable = media_url
        .as_deref()
        .map(|url| engine.arbiter.resolve_for_playback(url));
    print_json(&json!({
        "talk_id": talk_id,
        "message": message,
        "attempts": attempts,
        "media_url": media_url,
        "playable_url": playable.as_ref().map(ResolvedMedia::url),
        "local_copy": playable.as_ref().map(ResolvedMedia::is_local_blob).unwrap_or(false),
    }))?;
    Ok(if playable.is_some() { 0 } else { 1 })
}

fn run_status(args: StatusArgs) -> Result<i32> {
    let settings = Settings::from_env();
    let Some(handle) = JobHandle::new(&args.talk_id) else {
        bail!("talk id must not be empty");
    };
    let api = HttpTalkApi::new(&settings)?;
    let payload = api.talk_status(handle.id(), settings.request_timeout())?;
    let status = JobStatus::from_payload(payload);
    let url = match &status {
        JobStatus::Done(payload) => resolve_result_url(payload),
        _ => None,
    };
    print_json(&json!({
        "talk_id": handle.id(),
        "state": status.label(),
        "media_url": url,
        "payload": status.payload(),
    }))?;
    Ok(0)
}

fn run_resolve(args: ResolveArgs) -> Result<i32> {
    let payload = read_payload(&args.payload)?;
    match resolve_result_url(&payload) {
        Some(url) => {
            println!("{url}");
            Ok(0)
        }
        None => {
            eprintln!("no playable URL found");
            Ok(1)
        }
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let settings = Settings::from_env().with_poll_overrides(args.timeout, args.interval);
    let backend = if args.echo {
        None
    } else {
        match ChatBackend::from_settings(&settings)? {
            Some(backend) => Some(Arc::new(backend)),
            None => bail!("chat backend not configured; set CHAT_API_BASE or pass --echo"),
        }
    };
    let prefs_path = args
        .prefs
        .clone()
        .unwrap_or_else(|| args.out.join("prefs.json"));
    let engine = Engine::build(settings, &args.out, args.events.clone())?;
    let mut session = Session::new(
        engine.blobs.clone(),
        PreferenceStore::new(prefs_path),
        engine.events.clone(),
    )
    .with_voice_selector(engine.settings.voice_selector())
    .with_image_origin(args.image_origin.clone());
    session.set_video_replies(!args.no_video);
    let player = ConsolePlayer::new(args.open, args.strict_autoplay);

    let (tx, rx) = mpsc::channel();
    spawn_stdin_reader(tx.clone());
    let mut app = ChatApp::new(session, player, engine.pipeline(), backend, tx);
    app.load_seed_questions();

    println!("facetalk chat started. Type /help for commands.");
    for entry in app.session.log().entries() {
        println!("{}: {}", entry.role.label(), entry.text);
    }
    prompt()?;
    while let Ok(event) = rx.recv() {
        if !app.handle_event(event)? {
            break;
        }
    }
    app.session.shutdown(&mut app.player);
    Ok(())
}

enum LoopEvent {
    Line(String),
    Eof,
    Answer {
        ticket: PipelineTicket,
        result: Result<ChatAnswer, String>,
    },
    Media {
        outcome: PipelineOutcome,
        bot_text: Option<String>,
    },
    Transcript(Result<String, String>),
}

/// The chat loop's state. Only this thread touches the session; workers
/// report back through `tx`.
struct ChatApp {
    session: Session,
    player: ConsolePlayer,
    pipeline: ReplyPipeline,
    backend: Option<Arc<ChatBackend>>,
    seeds: SeedQuestions,
    current_question: String,
    suggestion_pick: usize,
    tx: Sender<LoopEvent>,
    in_flight: usize,
    input_closed: bool,
}

impl ChatApp {
    fn new(
        session: Session,
        player: ConsolePlayer,
        pipeline: ReplyPipeline,
        backend: Option<Arc<ChatBackend>>,
        tx: Sender<LoopEvent>,
    ) -> Self {
        let seeds = SeedQuestions::fallback();
        Self {
            session,
            player,
            pipeline,
            backend,
            current_question: seeds.random_question.clone(),
            seeds,
            suggestion_pick: 0,
            tx,
            in_flight: 0,
            input_closed: false,
        }
    }

    /// Returns `false` once the loop should end.
    fn handle_event(&mut self, event: LoopEvent) -> Result<bool> {
        match event {
            LoopEvent::Line(line) => {
                if !self.handle_line(&line)? {
                    return Ok(false);
                }
                prompt()?;
            }
            LoopEvent::Eof => self.input_closed = true,
            LoopEvent::Answer { ticket, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.handle_answer(ticket, result);
            }
            LoopEvent::Media { outcome, bot_text } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.handle_media(outcome, bot_text);
            }
            LoopEvent::Transcript(result) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.handle_transcript(result);
            }
        }
        Ok(!(self.input_closed && self.in_flight == 0))
    }

    fn handle_line(&mut self, line: &str) -> Result<bool> {
        let command = parse_command(line);
        // Typing counts as a user gesture; a tap is handled by the toggle itself.
        if !matches!(command, ChatCommand::Noop | ChatCommand::Tap) {
            self.session.user_gesture(&mut self.player);
        }
        let name = command_name(&command);
        match self.run_command(command) {
            Ok(keep_going) => Ok(keep_going),
            Err(err) => {
                tracing::warn!(command = name, error = %format!("{err:#}"), "chat command failed");
                println!("/{name} failed: {err:#}");
                Ok(true)
            }
        }
    }

    fn run_command(&mut self, command: ChatCommand) -> Result<bool> {
        match command {
            ChatCommand::Noop => {}
            ChatCommand::Help => println!("Commands: {}", CHAT_HELP_COMMANDS.join("  ")),
            ChatCommand::Video(None) => println!(
                "Video replies are {}",
                if self.session.video_replies() { "on" } else { "off" }
            ),
            ChatCommand::Video(Some(enabled)) => {
                self.session.set_video_replies(enabled);
                println!("Video replies {}", if enabled { "on" } else { "off" });
            }
            ChatCommand::Tap => match self.session.toggle_mute(&mut self.player) {
                Some(mode) => println!("Media {}", mode.label()),
                None => println!("Nothing is playing"),
            },
            ChatCommand::Stop => self.session.media_ended(&mut self.player),
            ChatCommand::Persona(None) => {
                let persona = self.session.persona();
                println!(
                    "Persona: {} / {} / {} ({})",
                    persona.image.as_deref().unwrap_or("<no image>"),
                    persona.role,
                    persona.gender,
                    persona.specialty
                );
            }
            ChatCommand::Persona(Some(args)) => {
                let persona = Persona {
                    image: Some(args.image),
                    role: args.role,
                    gender: args.gender,
                    specialty: self.session.persona().specialty.clone(),
                };
                self.session.set_persona(persona)?;
                println!("Persona updated");
            }
            ChatCommand::Specialty(specialty) => {
                let persona = Persona {
                    specialty,
                    ..self.session.persona().clone()
                };
                self.session.set_persona(persona)?;
                self.load_seed_questions();
                println!("Specialty set to {}", self.session.persona().specialty);
            }
            ChatCommand::Questions => self.suggest_question(),
            ChatCommand::Record(path) => self.transcribe(&path)?,
            ChatCommand::Export(path) => {
                fs::write(&path, self.session.log().export_text())
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Chat log written to {}", path.display());
            }
            ChatCommand::Reset => {
                self.session.reset(&mut self.player)?;
                self.seeds = SeedQuestions::fallback();
                self.current_question = self.seeds.random_question.clone();
                println!("Session reset");
            }
            ChatCommand::Quit => return Ok(false),
            ChatCommand::Message(text) => self.send_message(text),
            ChatCommand::Invalid { command, reason } => println!("/{command}: {reason}"),
        }
        Ok(true)
    }

    fn send_message(&mut self, text: String) {
        self.session.log_mut().push_user(text.clone());
        let ticket = self.session.begin_reply(&mut self.player);
        let Some(backend) = self.backend.clone() else {
            self.in_flight += 1;
            let answer = ChatAnswer {
                answer: text,
                audio_base64: None,
                video_url: None,
            };
            let _ = self.tx.send(LoopEvent::Answer {
                ticket,
                result: Ok(answer),
            });
            return;
        };
        let persona = self.session.persona().clone();
        let request = AskRequest {
            question: text,
            role: persona.role,
            gender: persona.gender,
            model_type: persona.specialty,
            response_with_audio: self.session.video_replies(),
        };
        self.spawn(move || LoopEvent::Answer {
            ticket,
            result: backend.ask(&request).map_err(|err| format!("{err:#}")),
        });
    }

    fn handle_answer(&mut self, ticket: PipelineTicket, result: Result<ChatAnswer, String>) {
        let answer = match result {
            Ok(answer) => answer,
            Err(err) => {
                tracing::warn!(error = %err, "chat backend did not answer");
                self.append_bot(ASK_FAILED_TEXT, ticket);
                return;
            }
        };
        if !self.session.counter().is_current(ticket) {
            self.print_bot(answer.answer);
            return;
        }
        if let Some(request) = self
            .session
            .plan_talk(&answer.answer, ReplyTrigger::MessageSent)
        {
            println!("(generating video reply...)");
            self.spawn_pipeline(ticket, request, Some(answer.answer));
            return;
        }
        let audio = answer.audio_bytes();
        let video_url = answer.video_url.clone();
        self.print_bot(answer.answer);
        if let Some(url) = video_url {
            let pipeline = self.pipeline.clone();
            let counter = self.session.counter();
            self.spawn(move || LoopEvent::Media {
                outcome: pipeline.run_candidate(ticket, &counter, &url),
                bot_text: None,
            });
            return;
        }
        match audio {
            Ok(Some(bytes)) => {
                if let Err(err) = self.session.play_audio_reply(&bytes, &mut self.player) {
                    tracing::warn!(error = %format!("{err:#}"), "could not play audio reply");
                }
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "audio reply ignored"),
        }
    }

    fn handle_media(&mut self, outcome: PipelineOutcome, bot_text: Option<String>) {
        let degraded = outcome.media.is_none();
        let message = outcome.message.clone();
        let applied = self.session.apply(outcome, &mut self.player);
        if applied && degraded {
            println!("(video unavailable: {message})");
        }
        if let Some(text) = bot_text {
            self.print_bot(text);
        }
    }

    fn handle_transcript(&mut self, result: Result<String, String>) {
        match result {
            Ok(text) if text.trim().is_empty() => println!("(nothing recognized)"),
            Ok(text) => {
                println!("You (voice): {text}");
                self.send_message(text);
            }
            Err(err) => {
                tracing::warn!(error = %err, "transcription failed");
                let ticket = self.session.begin_reply(&mut self.player);
                self.append_bot(TRANSCRIBE_FAILED_TEXT, ticket);
            }
        }
    }

    /// A bot line that was not produced by the send flow still gets voiced.
    fn append_bot(&mut self, text: &str, ticket: PipelineTicket) {
        self.print_bot(text.to_string());
        if !self.session.counter().is_current(ticket) {
            return;
        }
        if let Some(request) = self
            .session
            .plan_talk(text, ReplyTrigger::BotMessageAppended)
        {
            self.spawn_pipeline(ticket, request, None);
        }
    }

    fn print_bot(&mut self, text: String) {
        println!("Bot: {text}");
        self.session.log_mut().push_bot(text);
    }

    fn spawn_pipeline(
        &mut self,
        ticket: PipelineTicket,
        request: GenerationRequest,
        bot_text: Option<String>,
    ) {
        if !self.session.mark_submitted(ticket) {
            tracing::debug!(generation = ticket.generation(), "talk handed over outside a fresh reply");
        }
        let pipeline = self.pipeline.clone();
        let counter = self.session.counter();
        self.spawn(move || LoopEvent::Media {
            outcome: pipeline.run(ticket, &counter, &request),
            bot_text,
        });
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce() -> LoopEvent + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.tx.clone();
        thread::spawn(move || {
            let _ = tx.send(job());
        });
    }

    fn transcribe(&mut self, path: &Path) -> Result<()> {
        let Some(backend) = self.backend.clone() else {
            println!("/record needs a chat backend");
            return Ok(());
        };
        let wav = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        self.spawn(move || {
            LoopEvent::Transcript(backend.transcribe(wav).map_err(|err| format!("{err:#}")))
        });
        Ok(())
    }

    fn load_seed_questions(&mut self) {
        let Some(backend) = &self.backend else {
            return;
        };
        match backend.initial_data(&self.session.persona().specialty) {
            Ok(Some(seeds)) => {
                self.current_question = seeds.random_question.clone();
                self.seeds = seeds;
            }
            Ok(None) => tracing::info!("chat backend sent no questions; keeping defaults"),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "failed to load questions; keeping defaults")
            }
        }
    }

    fn suggest_question(&mut self) {
        for question in &self.seeds.questions {
            println!("  - {question}");
        }
        if let Some(next) = self.seeds.next_after(&self.current_question, self.suggestion_pick) {
            self.current_question = next.to_string();
            self.suggestion_pick += 1;
        }
        println!("Suggested: {}", self.current_question);
    }
}

fn command_name(command: &ChatCommand) -> &'static str {
    match command {
        ChatCommand::Noop | ChatCommand::Message(_) | ChatCommand::Invalid { .. } => "message",
        ChatCommand::Help => "help",
        ChatCommand::Video(_) => "video",
        ChatCommand::Tap => "tap",
        ChatCommand::Stop => "stop",
        ChatCommand::Persona(_) => "persona",
        ChatCommand::Specialty(_) => "specialty",
        ChatCommand::Questions => "questions",
        ChatCommand::Record(_) => "record",
        ChatCommand::Export(_) => "export",
        ChatCommand::Reset => "reset",
        ChatCommand::Quit => "quit",
    }
}

fn spawn_stdin_reader(tx: Sender<LoopEvent>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => {
                    let _ = tx.send(LoopEvent::Eof);
                    break;
                }
                Ok(_) => {
                    let text = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(LoopEvent::Line(text)).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "stdin read failed");
                    let _ = tx.send(LoopEvent::Eof);
                    break;
                }
            }
        }
    });
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

/// Prints what would be on screen, and optionally hands the media to the
/// system viewer.
struct ConsolePlayer {
    open_media: bool,
    strict_autoplay: bool,
    activated: bool,
    muted: bool,
    current: Option<String>,
    opened: bool,
}

impl ConsolePlayer {
    fn new(open_media: bool, strict_autoplay: bool) -> Self {
        Self {
            open_media,
            strict_autoplay,
            activated: false,
            muted: false,
            current: None,
            opened: false,
        }
    }
}

impl MediaPlayer for ConsolePlayer {
    fn load(&mut self, media: &ResolvedMedia) {
        self.current = Some(media.url().to_string());
        self.opened = false;
    }

    fn play(&mut self, mode: PlaybackMode) -> Result<(), PlaybackRejected> {
        let Some(url) = self.current.clone() else {
            return Err(PlaybackRejected("nothing loaded".to_string()));
        };
        if self.strict_autoplay && mode == PlaybackMode::Unmuted && !self.activated {
            return Err(PlaybackRejected("sound needs a user gesture".to_string()));
        }
        println!("[media] playing {}: {url}", mode.label());
        if self.open_media && !self.opened {
            self.opened = true;
            if let Err(err) = open::that(&url) {
                tracing::warn!(url = %url, error = %err, "failed to open media");
            }
        }
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn stop(&mut self) {
        if self.current.take().is_some() {
            println!("[media] stopped");
        }
    }

    fn user_activated(&mut self) {
        self.activated = true;
    }
}

fn source_image(arg: &str) -> Result<SourceImage> {
    let trimmed = arg.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Ok(SourceImage::Url(trimmed.to_string()));
    }
    let path = Path::new(trimmed);
    let bytes = fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image")
        .to_string();
    Ok(SourceImage::Binary {
        bytes,
        mime_type: image_mime_type(path).to_string(),
        file_name,
    })
}

fn image_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}

fn read_payload(source: &str) -> Result<Value> {
    let raw = if source == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read payload from stdin")?;
        buf
    } else {
        fs::read_to_string(source).with_context(|| format!("failed to read {source}"))?
    };
    serde_json::from_str(&raw).context("payload is not valid JSON")
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
