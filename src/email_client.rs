/// Outbound email delivery for verification and reset codes.
///
/// Posts to an HTTP email API. Callers treat delivery as fire-and-forget:
/// a failed send is logged, never rolled into the outcome of the operation
/// that queued it.
use serde::Serialize;

use crate::configuration::EmailSettings;
use crate::error::{AppError, EmailError};
use crate::store::verification_codes::CodePurpose;

#[derive(Clone)]
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    sender: String,
}

#[derive(Serialize)]
struct SendEmailRequest {
    from: String,
    to: String,
    subject: String,
    html: String,
}

fn code_email_html(title: &str, message: &str, code: &str) -> String {
    format!(
        r#"<div style="font-family: sans-serif; max-width: 600px; margin: auto; padding: 20px; border: 1px solid #ddd;">
  <h2 style="text-align: center; color: #333;">{title}</h2>
  <p>{message}</p>
  <div style="font-size: 36px; font-weight: bold; text-align: center; letter-spacing: 5px; margin: 30px 0; padding: 15px; background-color: #f2f2f2;">{code}</div>
  <p style="font-size: 12px; color: #888;">This code will expire in 15 minutes.</p>
</div>"#
    )
}

impl EmailClient {
    pub fn new(settings: EmailSettings, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url: settings.base_url,
            sender: settings.sender,
        }
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), AppError> {
        let url = format!("{}/email", self.base_url);
        let request = SendEmailRequest {
            from: self.sender.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        };

        self.http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                AppError::Email(EmailError::ServiceUnavailable(format!(
                    "Failed to reach email service: {}",
                    e
                )))
            })?
            .error_for_status()
            .map_err(|e| {
                AppError::Email(EmailError::DeliveryFailed(format!(
                    "Email service returned error: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Deliver a verification or reset code.
    pub async fn send_code(
        &self,
        to: &str,
        display_name: &str,
        purpose: CodePurpose,
        code: &str,
    ) -> Result<(), AppError> {
        let (subject, title, message) = match purpose {
            CodePurpose::Registration => (
                "Your Verification Code",
                "Verify Your Email",
                format!(
                    "Hi {}, please use the code below to verify your account.",
                    display_name
                ),
            ),
            CodePurpose::PasswordReset => (
                "Your Password Reset Code",
                "Password Reset Request",
                format!("Hi {}, use this code to reset your password.", display_name),
            ),
        };

        self.send(to, subject, &code_email_html(title, &message, code))
            .await
    }

    /// Sent once after successful email verification.
    pub async fn send_welcome(&self, to: &str, display_name: &str) -> Result<(), AppError> {
        let html = format!(
            "<div style=\"font-family: sans-serif;\"><h2>Welcome, {}!</h2><p>Your account is now verified.</p></div>",
            display_name
        );
        self.send(to, "Welcome aboard", &html).await
    }
}
