//! Server-rendered chat page.

use std::fmt::Write as _;

use crate::conversation::{Conversation, Message, Role};
use crate::ui::scroll::AutoScroll;

/// Escape text for HTML element content and double-quoted attributes.
#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Generate the HTML shell for the application.
#[must_use]
pub fn html_shell(title: &str, content: &str) -> String {
    let title = escape_html(title);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <link rel="stylesheet" href="/static/app.css">
    <script defer src="/static/chat.js"></script>
</head>
<body>
    <main id="app" class="page">
        {content}
    </main>
</body>
</html>"#
    )
}

/// One role-tagged message bubble.
#[must_use]
pub fn render_message(message: &Message) -> String {
    let role = message.role.as_str();
    let align = match message.role {
        Role::User => "end",
        Role::Assistant => "start",
    };
    format!(
        r#"<div class="row row-{align}" data-message-id="{id}"><div class="bubble bubble-{role}" data-role="{role}" title="{ts}">{content}</div></div>"#,
        id = message.id,
        ts = message.timestamp.to_rfc3339(),
        content = escape_html(&message.content),
    )
}

/// Chat card: scrollable history, text input and submit control.
///
/// While `busy`, the input and button render disabled and the button reads
/// "Sending...". The section then carries `data-busy`, which tells the
/// bundled script to wait for the session to go idle.
#[must_use]
pub fn chat_content(session_id: &str, conversation: &Conversation, busy: bool, scroll: &AutoScroll) -> String {
    let mut messages = String::new();
    for message in conversation.messages() {
        let _ = writeln!(messages, "{}", render_message(message));
    }

    let disabled = if busy { " disabled" } else { "" };
    let label = if busy { "Sending..." } else { "Send" };
    let busy_attr = if busy { r#" data-busy="true""# } else { "" };

    format!(
        r#"<section class="card chat" data-session-id="{session_id}"{busy_attr}>
    <div id="messages" class="scroll-area" data-bottom-tolerance="{tolerance}" aria-live="polite" aria-label="Chat messages">
        <div class="stack">
{messages}        </div>
        <div id="messages-end"></div>
    </div>
    <form id="chat-form" class="composer" method="post" action="/api/chat">
        <input type="hidden" name="session_id" value="{session_id}">
        <input name="message" class="input" placeholder="Type your message..." autocomplete="off" required{disabled}>
        <button type="submit" class="button"{disabled}>{label}</button>
    </form>
</section>"#,
        session_id = escape_html(session_id),
        tolerance = scroll.tolerance(),
    )
}

/// Full chat page for a session.
#[must_use]
pub fn chat_page(session_id: &str, conversation: &Conversation, busy: bool) -> String {
    html_shell(
        "Chat",
        &chat_content(session_id, conversation, busy, &AutoScroll::default()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationEvent;
    use chrono::Utc;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b>"a" & 'b'</b>"#),
            "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_messages_render_in_order_with_roles() {
        let mut conv = Conversation::new();
        conv.apply(&ConversationEvent::user_submitted("question <1>", Utc::now()));
        conv.apply(&ConversationEvent::ResponseStarted { at: Utc::now() });
        conv.apply(&ConversationEvent::Delta { text: "answer".into() });

        let html = chat_page("s-1", &conv, false);

        let user = html.find("question &lt;1&gt;").unwrap();
        let assistant = html.find("answer").unwrap();
        assert!(user < assistant);
        assert!(html.contains(r#"data-role="user""#));
        assert!(html.contains(r#"data-role="assistant""#));
        assert!(html.contains(r#"data-bottom-tolerance="10""#));
    }

    #[test]
    fn test_busy_disables_submit() {
        let html = chat_page("s-1", &Conversation::new(), true);
        assert!(html.contains("Sending..."));
        assert!(html.contains(r#"class="button" disabled"#));
        assert!(html.contains(r#"data-session-id="s-1" data-busy="true""#));

        let idle = chat_page("s-1", &Conversation::new(), false);
        assert!(idle.contains(">Send</button>"));
        assert!(!idle.contains(" disabled"));
        assert!(!idle.contains("data-busy"));
    }
}
