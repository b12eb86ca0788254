use engine_core::{Error, Model, Result};
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::{AlertContext, Endpoint, RenderAlert};

type PerObject<T> = Box<dyn Fn(&dyn Model) -> T + Send + Sync>;

/// Sends one plain-text message per object over SMTP.
///
/// The connection is configured from the `email` settings and checked at
/// setup. Recipients, sender, subject and body are resolved for every object:
/// each can be fixed or computed from the object, and sender, subject and body
/// fall back to values derived from the settings and the alert.
pub struct Email {
    recipients: PerObject<Vec<String>>,
    sent_from: Option<PerObject<String>>,
    subject: Option<PerObject<String>>,
    message: Option<PerObject<String>>,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl Email {
    pub fn new<I, S>(to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let to: Vec<String> = to.into_iter().map(Into::into).collect();
        Self {
            recipients: Box::new(move |_| to.clone()),
            sent_from: None,
            subject: None,
            message: None,
            transport: None,
        }
    }

    /// Recipients chosen per object, replacing the fixed list.
    pub fn with_recipients<F>(mut self, recipients: F) -> Self
    where
        F: Fn(&dyn Model) -> Vec<String> + Send + Sync + 'static,
    {
        self.recipients = Box::new(recipients);
        self
    }

    pub fn with_sent_from(self, sent_from: impl Into<String>) -> Self {
        let sent_from = sent_from.into();
        self.with_sent_from_fn(move |_| sent_from.clone())
    }

    pub fn with_sent_from_fn<F>(mut self, sent_from: F) -> Self
    where
        F: Fn(&dyn Model) -> String + Send + Sync + 'static,
    {
        self.sent_from = Some(Box::new(sent_from));
        self
    }

    pub fn with_subject(self, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        self.with_subject_fn(move |_| subject.clone())
    }

    pub fn with_subject_fn<F>(mut self, subject: F) -> Self
    where
        F: Fn(&dyn Model) -> String + Send + Sync + 'static,
    {
        self.subject = Some(Box::new(subject));
        self
    }

    /// Fixed body; every `{}` is replaced by the object's label.
    pub fn with_message(self, template: impl Into<String>) -> Self {
        let template = template.into();
        self.with_message_fn(move |obj| template.replace("{}", &obj.label()))
    }

    pub fn with_message_fn<F>(mut self, message: F) -> Self
    where
        F: Fn(&dyn Model) -> String + Send + Sync + 'static,
    {
        self.message = Some(Box::new(message));
        self
    }

    pub fn recipients(&self, obj: &dyn Model) -> Vec<String> {
        (self.recipients)(obj)
    }

    /// Configured sender, else the SMTP user, qualified with the server host
    /// when it is not an address already.
    pub fn sent_from(&self, ctx: &AlertContext, obj: &dyn Model) -> String {
        if let Some(sent_from) = &self.sent_from {
            return sent_from(obj);
        }
        let user = ctx.email.user.clone().unwrap_or_default();
        if user.contains('@') {
            user
        } else {
            format!("{}@{}", user, ctx.email.host().unwrap_or("localhost"))
        }
    }

    pub fn subject(&self, ctx: &AlertContext, obj: &dyn Model) -> String {
        match &self.subject {
            Some(subject) => subject(obj),
            None => format!("[ALERT - {}] {}", ctx.project_name, ctx.alert_name),
        }
    }

    pub fn message(&self, alert: &dyn RenderAlert, obj: &dyn Model) -> String {
        match &self.message {
            Some(message) => message(obj),
            None => alert.render(self, obj),
        }
    }

    /// Builds the message for `obj` without sending it.
    pub fn compose(&self, alert: &dyn RenderAlert, obj: &dyn Model) -> Result<Message> {
        let ctx = alert.context();
        let from: Mailbox = self
            .sent_from(ctx, obj)
            .parse()
            .map_err(|e| Error::endpoint(format!("invalid sender: {}", e)))?;

        let recipients = self.recipients(obj);
        if recipients.is_empty() {
            return Err(Error::endpoint(format!("no recipients for {}", obj.label())));
        }

        let mut builder = Message::builder()
            .from(from)
            .subject(self.subject(ctx, obj))
            .header(ContentType::TEXT_PLAIN);
        for recipient in &recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| Error::endpoint(format!("invalid recipient '{}': {}", recipient, e)))?;
            builder = builder.to(to);
        }

        builder
            .body(self.message(alert, obj))
            .map_err(|e| Error::endpoint(format!("cannot build message: {}", e)))
    }
}

fn smtp_error(e: lettre::transport::smtp::Error) -> Error {
    Error::endpoint(format!("smtp: {}", e))
}

#[async_trait::async_trait]
impl Endpoint for Email {
    async fn setup(&mut self, ctx: &AlertContext) -> Result<()> {
        let settings = &ctx.email;
        let host = settings
            .host()
            .ok_or_else(|| Error::endpoint("email server is not configured"))?;

        let mut builder = if settings.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(smtp_error)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        if let Some(port) = settings.port() {
            builder = builder.port(port);
        }
        if let (Some(user), Some(password)) = (&settings.user, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        let transport = builder.build();
        transport.test_connection().await.map_err(smtp_error)?;
        debug!(host = host, alert = %ctx.alert_path, "SMTP connection ready");

        self.transport = Some(transport);
        Ok(())
    }

    async fn process(&mut self, alert: &dyn RenderAlert, obj: &dyn Model) -> Result<()> {
        let message = self.compose(alert, obj)?;
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| Error::endpoint("email endpoint is not connected"))?;
        transport.send(message).await.map_err(smtp_error)?;
        Ok(())
    }

    async fn teardown(&mut self, _failure: Option<&Error>) -> Result<()> {
        self.transport = None;
        Ok(())
    }
}
