//! Message router: one inbound message in, exactly one reply out.
//!
//! `RECEIVED -> (attachment: ingest -> SUMMARIZED) | (text: classify -> GENERAL | ANALYSIS |
//! LOOKUP | RESET_ACK | CLARIFY) -> REPLIED`. The conversation's session is locked for the
//! whole message, so two messages from the same chat never interleave a dataset swap.

use crate::channels::{Attachment, Channel, InboundMessage};
use crate::dataset::{self, IngestError, SpreadsheetFormat, DEFAULT_LOOKUP_TOP_N};
use crate::intent::{ClassifyError, Intent, IntentClassifier, SmallTalk};
use crate::llm::ProviderChain;
use crate::session::{Session, SessionStore};
use std::sync::Arc;

const DEFAULT_SYSTEM_PROMPT: &str = "You are Hesab, a concise assistant for a small business on Telegram. \
Answer in the user's language (usually Persian). Keep answers short and practical.";

const GREETING_REPLY: &str = "سلام! 👋 یک فایل اکسل (xlsx یا xls) بفرستید تا تحلیلش کنم، یا سوالتان را بپرسید.";
const HELP_REPLY: &str = "📘 راهنما:\n\
• فایل اکسل فروش (xlsx یا xls) را بفرستید تا خلاصه آن را ببینید.\n\
• بعد بپرسید: «پرفروش‌ترین کالا»، «جمع فروش»، «مشتریان».\n\
• «داروی جدید <نام>»: مشتریانی که این قلم را خریده‌اند.\n\
• «فایل جدید» یا /reset: پاک کردن فایل فعلی.\n\
• هر سوال دیگری را هم می‌توانید بپرسید.";
const THANKS_REPLY: &str = "خواهش می‌کنم! 🌷";
const FAREWELL_REPLY: &str = "خدانگهدار! 👋";
const RESET_REPLY: &str = "🗑 فایل قبلی پاک شد. فایل جدید را بفرستید.";
const NEED_DATASET_REPLY: &str = "📎 برای این سوال اول یک فایل اکسل (xlsx یا xls) بفرستید.";
const EMPTY_TEXT_REPLY: &str = "پیامی دریافت نشد. سوالتان را بنویسید یا یک فایل اکسل بفرستید.";
const MISSING_ITEM_REPLY: &str = "نام قلم را هم بنویسید، مثلاً: «داروی جدید آموکسیسیلین».";
const UNRECOGNIZED_REPLY: &str = "متوجه نشدم. 🤔 /help را بفرستید تا ببینید چه کارهایی از من برمی‌آید.";
const DEGRADED_REPLY: &str = "⚠️ در حال حاضر به مدل زبانی دسترسی ندارم. \
درباره فایلی که فرستادید بپرسید، مثلاً «خلاصه فایل»، «پرفروش‌ترین کالا» یا «داروی جدید <نام>».";
const INTERNAL_ERROR_REPLY: &str = "⚠️ خطای داخلی رخ داد. لطفاً کمی بعد دوباره تلاش کنید.";
const DOWNLOAD_FAILED_REPLY: &str = "❌ دریافت فایل از تلگرام ممکن نشد. لطفاً دوباره بفرستید.";

/// Which branch produced the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Attachment ingested; reply is the dataset summary.
    Summarized,
    /// Attachment could not be downloaded or parsed.
    IngestFailed,
    /// Canned greeting, help, thanks or farewell.
    SmallTalk,
    /// Answer from the provider chain.
    General,
    /// Provider chain exhausted while a dataset is attached.
    Degraded,
    Analysis,
    Lookup,
    ResetAck,
    /// The message needs more from the user (missing parameter, no dataset, not understood).
    Clarify,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub text: String,
}

impl Reply {
    fn new(kind: ReplyKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Routes inbound messages through sessions, intents, the analyzer and the provider chain.
pub struct MessageRouter {
    store: Arc<SessionStore>,
    classifier: IntentClassifier,
    providers: ProviderChain,
    channel: Arc<dyn Channel>,
    system_prompt: String,
}

impl MessageRouter {
    pub fn new(
        store: Arc<SessionStore>,
        classifier: IntentClassifier,
        providers: ProviderChain,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            store,
            classifier,
            providers,
            channel,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Replace the built-in system instruction for general questions.
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        if let Some(p) = prompt.filter(|p| !p.trim().is_empty()) {
            self.system_prompt = p;
        }
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Handle one message and return the reply without sending it.
    pub async fn handle(&self, msg: &InboundMessage) -> Reply {
        let handle = self.store.get_or_create(&msg.conversation_id).await;
        let mut session = handle.lock().await;
        self.process(msg, &mut session).await
    }

    /// Handle one message and send the reply to its conversation. Delivery failures are
    /// logged, not retried. The session stays locked until the reply is sent.
    pub async fn dispatch(&self, msg: InboundMessage) -> Reply {
        let handle = self.store.get_or_create(&msg.conversation_id).await;
        let mut session = handle.lock().await;
        let reply = self.process(&msg, &mut session).await;
        if let Err(e) = self
            .channel
            .send_message(&msg.conversation_id, &reply.text)
            .await
        {
            log::warn!(
                "router: sending reply to {} via {} failed: {}",
                msg.conversation_id,
                self.channel.id(),
                e
            );
        }
        reply
    }

    /// Tell a conversation its message could not be handled (the handler crashed).
    /// Delivery failures are logged.
    pub async fn notify_internal_error(&self, conversation_id: &str) {
        if let Err(e) = self
            .channel
            .send_message(conversation_id, INTERNAL_ERROR_REPLY)
            .await
        {
            log::warn!(
                "router: sending internal-error notice to {} failed: {}",
                conversation_id,
                e
            );
        }
    }

    async fn process(&self, msg: &InboundMessage, session: &mut Session) -> Reply {
        session.touch(self.store.now());

        if let Some(attachment) = &msg.attachment {
            return self.ingest(attachment, session).await;
        }

        let text = msg.text.trim();
        if text.is_empty() {
            return Reply::new(ReplyKind::Clarify, EMPTY_TEXT_REPLY);
        }

        let intent = self.classifier.classify(text, session.has_dataset()).await;
        log::debug!(
            "router: {} classified as {}",
            msg.conversation_id,
            intent.category().as_str()
        );
        match intent {
            Intent::General {
                small_talk: Some(kind),
            } => Reply::new(ReplyKind::SmallTalk, small_talk_reply(kind)),
            Intent::General { small_talk: None } => self.answer_general(text, session).await,
            Intent::AnalyzeSummary => match &session.dataset {
                Some(dataset) => {
                    let summary = dataset::summarize(dataset);
                    let name = session.dataset_name.as_deref().unwrap_or("");
                    Reply::new(ReplyKind::Analysis, format!("📁 {}\n{}", name, summary))
                }
                None => Reply::new(ReplyKind::Clarify, NEED_DATASET_REPLY),
            },
            Intent::NewItemLookup { item } => match &session.dataset {
                Some(dataset) => {
                    let result = dataset::lookup_related_customers(&item, dataset, DEFAULT_LOOKUP_TOP_N);
                    Reply::new(ReplyKind::Lookup, result.to_string())
                }
                None => Reply::new(ReplyKind::Clarify, NEED_DATASET_REPLY),
            },
            Intent::ResetSession => {
                session.clear_dataset();
                Reply::new(ReplyKind::ResetAck, RESET_REPLY)
            }
            Intent::Unrecognized(ClassifyError::MissingParameter { .. }) => {
                Reply::new(ReplyKind::Clarify, MISSING_ITEM_REPLY)
            }
        }
    }

    /// Download, parse and attach a spreadsheet. Unsupported names are rejected before download.
    async fn ingest(&self, attachment: &Attachment, session: &mut Session) -> Reply {
        let name = attachment.file_name.clone();
        let mime = attachment.mime_type.clone();
        if SpreadsheetFormat::detect(&name, mime.as_deref()).is_none() {
            let err = IngestError::UnsupportedFormat { name };
            return Reply::new(ReplyKind::IngestFailed, format!("❌ {}", err));
        }

        let bytes = match self.channel.download(attachment).await {
            Ok(b) => b,
            Err(e) => {
                log::warn!("router: downloading {} failed: {}", attachment.file_id, e);
                return Reply::new(ReplyKind::IngestFailed, DOWNLOAD_FAILED_REPLY);
            }
        };

        let parse_name = name.clone();
        let parsed = tokio::task::spawn_blocking(move || {
            dataset::ingest_with_media_type(&bytes, &parse_name, mime.as_deref())
        })
        .await;
        let dataset = match parsed {
            Ok(Ok(d)) => d,
            Ok(Err(e)) => {
                log::info!("router: ingest of {} failed: {}", name, e);
                return Reply::new(ReplyKind::IngestFailed, format!("❌ {}", e));
            }
            Err(e) => {
                log::warn!("router: ingest task for {} failed: {}", name, e);
                let err = IngestError::CorruptFile {
                    name,
                    reason: "parser crashed".to_string(),
                };
                return Reply::new(ReplyKind::IngestFailed, format!("❌ {}", err));
            }
        };

        let summary = dataset::summarize(&dataset);
        session.set_dataset(dataset, name.clone());
        Reply::new(
            ReplyKind::Summarized,
            format!("✅ فایل «{}» دریافت شد.\n{}", name, summary),
        )
    }

    async fn answer_general(&self, text: &str, session: &Session) -> Reply {
        let system = self.system_instruction(session);
        match self.providers.ask(text, Some(&system)).await {
            Ok(reply) => Reply::new(ReplyKind::General, reply.text),
            Err(exhausted) => {
                log::warn!("router: {}", exhausted);
                if session.has_dataset() {
                    Reply::new(ReplyKind::Degraded, DEGRADED_REPLY)
                } else {
                    Reply::new(ReplyKind::Clarify, UNRECOGNIZED_REPLY)
                }
            }
        }
    }

    /// Base prompt, plus a short description of the attached dataset.
    fn system_instruction(&self, session: &Session) -> String {
        let mut out = self.system_prompt.clone();
        if let Some(dataset) = &session.dataset {
            out.push_str(&format!(
                "\n\nThe user has uploaded the spreadsheet \"{}\" with {} rows and these columns: {}.",
                session.dataset_name.as_deref().unwrap_or("file"),
                dataset.row_count(),
                dataset.columns().join(", ")
            ));
        }
        out
    }
}

fn small_talk_reply(kind: SmallTalk) -> &'static str {
    match kind {
        SmallTalk::Greeting => GREETING_REPLY,
        SmallTalk::Help => HELP_REPLY,
        SmallTalk::Thanks => THANKS_REPLY,
        SmallTalk::Farewell => FAREWELL_REPLY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelError;
    use crate::llm::{Provider, ProviderError, ProviderOutcome};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeChannel {
        files: HashMap<String, Vec<u8>>,
        sent: Mutex<Vec<(String, String)>>,
        downloads: AtomicUsize,
        fail_send: bool,
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn id(&self) -> &str {
            "fake"
        }

        async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
            if self.fail_send {
                return Err(ChannelError::Api("down".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(&attachment.file_id)
                .cloned()
                .ok_or_else(|| ChannelError::MissingFile(attachment.file_id.clone()))
        }
    }

    struct Counting {
        outcome: ProviderOutcome,
        calls: AtomicUsize,
        last_system: Mutex<Option<String>>,
    }

    #[async_trait]
    impl Provider for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn ask(&self, _prompt: &str, system: Option<&str>) -> ProviderOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_system.lock().unwrap() = system.map(|s| s.to_string());
            self.outcome.clone()
        }
    }

    fn sales_xlsx() -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, name) in ["شرح کالا", "جمع کل خالص", "نام مشتری"].iter().enumerate() {
            sheet.write_string(0, col as u16, *name).unwrap();
        }
        sheet.write_string(1, 0, "X").unwrap();
        sheet.write_string(1, 1, "1,000").unwrap();
        sheet.write_string(1, 2, "Ali").unwrap();
        sheet.write_string(2, 0, "X").unwrap();
        sheet.write_string(2, 1, "2,500").unwrap();
        sheet.write_string(2, 2, "Sara").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    struct Harness {
        router: MessageRouter,
        channel: Arc<FakeChannel>,
        provider: Arc<Counting>,
    }

    fn harness_with(outcome: ProviderOutcome, fail_send: bool) -> Harness {
        let mut files = HashMap::new();
        files.insert("F1".to_string(), sales_xlsx());
        files.insert("BROKEN".to_string(), b"not a workbook".to_vec());
        let channel = Arc::new(FakeChannel {
            files,
            fail_send,
            ..Default::default()
        });
        let provider = Arc::new(Counting {
            outcome,
            calls: AtomicUsize::new(0),
            last_system: Mutex::new(None),
        });
        let providers: Vec<Arc<dyn Provider>> = vec![provider.clone()];
        let store = Arc::new(SessionStore::with_ttl(Duration::from_secs(86_400)));
        let router = MessageRouter::new(
            store,
            IntentClassifier::rules_only(),
            ProviderChain::new(providers),
            channel.clone(),
        );
        Harness {
            router,
            channel,
            provider,
        }
    }

    fn harness() -> Harness {
        harness_with(Ok("model answer".to_string()), false)
    }

    fn upload(chat: &str, file_id: &str, name: &str) -> InboundMessage {
        InboundMessage {
            conversation_id: chat.to_string(),
            text: String::new(),
            attachment: Some(Attachment {
                file_id: file_id.to_string(),
                file_name: name.to_string(),
                mime_type: None,
            }),
        }
    }

    #[tokio::test]
    async fn unsupported_attachment_short_circuits_before_download() {
        let h = harness();
        let reply = h.router.handle(&upload("1", "F1", "report.pdf")).await;
        assert_eq!(reply.kind, ReplyKind::IngestFailed);
        assert_eq!(h.channel.downloads.load(Ordering::SeqCst), 0);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
        assert!(!h.router.store().get("1").await.unwrap().has_dataset());
    }

    #[tokio::test]
    async fn corrupt_attachment_reports_error() {
        let h = harness();
        let reply = h.router.handle(&upload("1", "BROKEN", "sales.xlsx")).await;
        assert_eq!(reply.kind, ReplyKind::IngestFailed);
        assert!(reply.text.contains("sales.xlsx"));
    }

    #[tokio::test]
    async fn upload_then_analysis_and_lookup() {
        let h = harness();
        let reply = h.router.handle(&upload("7", "F1", "sales.xlsx")).await;
        assert_eq!(reply.kind, ReplyKind::Summarized);
        assert!(reply.text.contains("3500"));

        let session = h.router.store().get("7").await.unwrap();
        assert_eq!(session.dataset_name.as_deref(), Some("sales.xlsx"));

        let reply = h
            .router
            .handle(&InboundMessage::from_text("7", "پرفروش‌ترین کالا"))
            .await;
        assert_eq!(reply.kind, ReplyKind::Analysis);
        assert!(reply.text.contains("3500"));

        let reply = h
            .router
            .handle(&InboundMessage::from_text("7", "داروی جدید آموکسیسیلین"))
            .await;
        assert_eq!(reply.kind, ReplyKind::Lookup);
        assert!(reply.text.contains("آموکسیسیلین"));

        let reply = h
            .router
            .handle(&InboundMessage::from_text("7", "داروی جدید X"))
            .await;
        assert_eq!(reply.kind, ReplyKind::Lookup);
        assert!(reply.text.contains("Ali"));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reset_clears_dataset() {
        let h = harness();
        h.router.handle(&upload("7", "F1", "sales.xlsx")).await;
        let reply = h.router.handle(&InboundMessage::from_text("7", "/reset")).await;
        assert_eq!(reply.kind, ReplyKind::ResetAck);
        assert!(!h.router.store().get("7").await.unwrap().has_dataset());

        let reply = h
            .router
            .handle(&InboundMessage::from_text("7", "داروی جدید X"))
            .await;
        assert_eq!(reply.kind, ReplyKind::Clarify);
    }

    #[tokio::test]
    async fn missing_lookup_parameter_asks_for_it() {
        let h = harness();
        let reply = h
            .router
            .handle(&InboundMessage::from_text("3", "داروی جدید"))
            .await;
        assert_eq!(reply, Reply::new(ReplyKind::Clarify, MISSING_ITEM_REPLY));
    }

    #[tokio::test]
    async fn small_talk_does_not_call_providers() {
        let h = harness();
        let reply = h.router.handle(&InboundMessage::from_text("3", "سلام")).await;
        assert_eq!(reply.kind, ReplyKind::SmallTalk);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn general_question_goes_to_provider_with_dataset_context() {
        let h = harness();
        let reply = h
            .router
            .handle(&InboundMessage::from_text("3", "پایتخت ایران کجاست؟"))
            .await;
        assert_eq!(reply, Reply::new(ReplyKind::General, "model answer"));

        h.router.handle(&upload("3", "F1", "sales.xlsx")).await;
        h.router
            .handle(&InboundMessage::from_text("3", "پایتخت ایران کجاست؟"))
            .await;
        let system = h.provider.last_system.lock().unwrap().clone().unwrap();
        assert!(system.contains("sales.xlsx"));
        assert!(system.contains("جمع کل خالص"));
    }

    #[tokio::test]
    async fn exhausted_providers_degrade_by_dataset_presence() {
        let h = harness_with(Err(ProviderError::Timeout), false);
        let reply = h
            .router
            .handle(&InboundMessage::from_text("5", "یک شعر بگو"))
            .await;
        assert_eq!(reply.kind, ReplyKind::Clarify);

        h.router.handle(&upload("5", "F1", "sales.xlsx")).await;
        let reply = h
            .router
            .handle(&InboundMessage::from_text("5", "یک شعر بگو"))
            .await;
        assert_eq!(reply.kind, ReplyKind::Degraded);
        assert!(!reply.text.contains("timed out"));
    }

    #[tokio::test]
    async fn dispatch_sends_one_reply() {
        let h = harness();
        let reply = h.router.dispatch(InboundMessage::from_text("11", "مرسی")).await;
        let sent = h.channel.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("11".to_string(), reply.text)]);
    }

    #[tokio::test]
    async fn dispatch_swallows_send_failure() {
        let h = harness_with(Ok("x".to_string()), true);
        let reply = h.router.dispatch(InboundMessage::from_text("11", "/help")).await;
        assert_eq!(reply.kind, ReplyKind::SmallTalk);
        assert!(h.channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn internal_error_notice_is_sent_and_send_failure_swallowed() {
        let h = harness();
        h.router.notify_internal_error("13").await;
        let sent = h.channel.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("13".to_string(), INTERNAL_ERROR_REPLY.to_string())]);

        let failing = harness_with(Ok("x".to_string()), true);
        failing.router.notify_internal_error("13").await;
        assert!(failing.channel.sent.lock().unwrap().is_empty());
    }

    /// Blocks every call until released.
    struct Gated {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl Provider for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        async fn ask(&self, _prompt: &str, _system: Option<&str>) -> ProviderOutcome {
            self.entered.notify_one();
            self.release.notified().await;
            Ok("slow answer".to_string())
        }
    }

    #[tokio::test]
    async fn same_conversation_is_serialized_other_conversations_are_not() {
        let gate = Arc::new(Gated {
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let providers: Vec<Arc<dyn Provider>> = vec![gate.clone()];
        let router = Arc::new(MessageRouter::new(
            Arc::new(SessionStore::with_ttl(Duration::from_secs(86_400))),
            IntentClassifier::rules_only(),
            ProviderChain::new(providers),
            Arc::new(FakeChannel::default()),
        ));

        let r = router.clone();
        let first = tokio::spawn(async move {
            r.handle(&InboundMessage::from_text("1", "یک شعر بگو")).await
        });
        gate.entered.notified().await;

        let r = router.clone();
        let second =
            tokio::spawn(async move { r.handle(&InboundMessage::from_text("1", "/reset")).await });

        let other = tokio::time::timeout(
            Duration::from_secs(2),
            router.handle(&InboundMessage::from_text("2", "/reset")),
        )
        .await
        .expect("another conversation is not blocked");
        assert_eq!(other.kind, ReplyKind::ResetAck);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!first.is_finished());
        assert!(!second.is_finished(), "second message ran while the first held the session");

        gate.release.notify_one();
        let first = first.await.unwrap();
        assert_eq!(first, Reply::new(ReplyKind::General, "slow answer"));
        let second = tokio::time::timeout(Duration::from_secs(2), second)
            .await
            .expect("second message completes after the first")
            .unwrap();
        assert_eq!(second.kind, ReplyKind::ResetAck);
    }

    #[tokio::test]
    async fn empty_text_asks_for_input_and_touches_session() {
        let h = harness();
        let reply = h.router.handle(&InboundMessage::from_text("9", "   ")).await;
        assert_eq!(reply.kind, ReplyKind::Clarify);
        assert!(h.router.store().get("9").await.is_some());
    }
}
