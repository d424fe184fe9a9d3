//! HTML Pages
//!
//! Minimal server-rendered pages. Every interpolated value goes through
//! `escape_html`.

use axum::response::Html;

use crate::domain::entity::UserRecord;
use crate::domain::value_object::login_flow::{FlowParams, LoginFlow, TokenKind};

/// Escape text for element content and double-quoted attributes
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{} | dhg-baseline</title>\n</head>\n<body>\n<main>\n{}\n</main>\n</body>\n</html>\n",
        escape_html(title),
        body
    ))
}

// ============================================================================
// Login
// ============================================================================

/// Everything the login page shows besides the form fields themselves
#[derive(Debug, Default)]
pub struct LoginView<'a> {
    pub params: Option<&'a FlowParams>,
    /// Email typed on the previous attempt
    pub email: Option<&'a str>,
    pub error: Option<&'a str>,
    pub notice: Option<&'a str>,
}

fn heading(flow: &LoginFlow) -> (&'static str, &'static str) {
    match flow {
        LoginFlow::Login => ("Sign in", "Sign in"),
        LoginFlow::Signup { confirmation: None } => ("Create account", "Sign up"),
        LoginFlow::Signup {
            confirmation: Some(_),
        } => ("Confirm your email", "Confirm"),
        LoginFlow::Recovery { token: None } => ("Reset password", "Send reset link"),
        LoginFlow::Recovery { token: Some(_) } => ("Choose a new password", "Set password"),
        LoginFlow::Invite { .. } => ("Accept invitation", "Set password"),
        LoginFlow::SetPassword {
            kind: TokenKind::Invite,
        } => ("Accept invitation", "Set password"),
        LoginFlow::SetPassword { .. } => ("Choose a new password", "Set password"),
    }
}

pub fn login_page(flow: &LoginFlow, view: &LoginView<'_>) -> Html<String> {
    let (title, submit) = heading(flow);
    let fields = flow.fields();

    let action = match view.params.map(FlowParams::to_query) {
        Some(query) if !query.is_empty() => format!("/login?{query}"),
        _ => "/login".to_string(),
    };

    let mut body = format!("<h1>{}</h1>\n", escape_html(title));

    if let Some(error) = view.error {
        body.push_str(&format!(
            "<p class=\"error\" role=\"alert\">{}</p>\n",
            escape_html(error)
        ));
    }
    if let Some(notice) = view.notice {
        body.push_str(&format!(
            "<p class=\"notice\" role=\"status\">{}</p>\n",
            escape_html(notice)
        ));
    }

    body.push_str(&format!(
        "<form method=\"post\" action=\"{}\" data-flow=\"{}\">\n",
        escape_html(&action),
        flow.name()
    ));
    if fields.email {
        body.push_str(&format!(
            "<label>Email <input type=\"email\" name=\"email\" autocomplete=\"email\" required value=\"{}\"></label>\n",
            escape_html(view.email.unwrap_or(""))
        ));
    }
    if fields.password {
        let autocomplete = if fields.confirmation {
            "new-password"
        } else {
            "current-password"
        };
        body.push_str(&format!(
            "<label>Password <input type=\"password\" name=\"password\" autocomplete=\"{autocomplete}\" required></label>\n"
        ));
    }
    if fields.confirmation {
        body.push_str(
            "<label>Confirm password <input type=\"password\" name=\"password_confirmation\" autocomplete=\"new-password\" required></label>\n",
        );
    }
    body.push_str(&format!(
        "<button type=\"submit\">{}</button>\n</form>\n",
        escape_html(submit)
    ));

    body.push_str("<nav>\n");
    match flow {
        LoginFlow::Login => body.push_str(
            "<a href=\"/login?type=recovery\">Forgot password?</a>\n\
             <a href=\"/login?type=signup\">Create an account</a>\n",
        ),
        _ => body.push_str("<a href=\"/login\">Back to sign in</a>\n"),
    }
    body.push_str("</nav>");

    layout(title, &body)
}

// ============================================================================
// Other Pages
// ============================================================================

pub fn dashboard_page(user: &UserRecord) -> Html<String> {
    let body = format!(
        "<h1>Dashboard</h1>\n<p>Signed in as <strong>{}</strong></p>\n\
         <form method=\"post\" action=\"/logout\"><button type=\"submit\">Sign out</button></form>",
        escape_html(user.display_name())
    );
    layout("Dashboard", &body)
}

/// Neutral indicator while the initial session check runs
pub fn loading_page() -> Html<String> {
    layout("Loading", "<p aria-busy=\"true\">Loading...</p>")
}

/// Moves the URL fragment (never sent to servers) into the query string
/// and comes back here
pub fn callback_page() -> Html<String> {
    layout(
        "Signing in",
        "<p>Signing you in...</p>\n\
         <script>\n\
         (function () {\n\
           var hash = window.location.hash.replace(/^#/, '');\n\
           window.location.replace(hash ? '/auth/callback?' + hash : '/login');\n\
         })();\n\
         </script>\n\
         <noscript><a href=\"/login\">Continue to sign in</a></noscript>",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_object::login_flow::FlowToken;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_login_page_fields_per_flow() {
        let login = login_page(&LoginFlow::Login, &LoginView::default()).0;
        assert!(login.contains("name=\"email\""));
        assert!(login.contains("name=\"password\""));
        assert!(!login.contains("password_confirmation"));
        assert!(login.contains("type=recovery"));

        let invite = LoginFlow::Invite {
            token: FlowToken::new("tok", None).unwrap(),
        };
        let page = login_page(&invite, &LoginView::default()).0;
        assert!(!page.contains("name=\"email\""));
        assert!(page.contains("password_confirmation"));
        assert!(page.contains("Accept invitation"));
    }

    #[test]
    fn test_login_page_escapes_messages_and_keeps_query() {
        let params = FlowParams::from_query("type=recovery&token=abc&redirectTo=%2Fdashboard");
        let flow = LoginFlow::from_params(&params);
        let page = login_page(
            &flow,
            &LoginView {
                params: Some(&params),
                error: Some("<script>alert(1)</script>"),
                ..LoginView::default()
            },
        )
        .0;
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>alert"));
        assert!(page.contains("action=\"/login?type=recovery&amp;token=abc&amp;redirectTo=%2Fdashboard\""));
    }

    #[test]
    fn test_link_session_page_keeps_marker() {
        let params = FlowParams::from_query("type=recovery&session=link&refresh_token=rt-secret");
        let flow = LoginFlow::from_params(&params);
        let page = login_page(
            &flow,
            &LoginView {
                params: Some(&params),
                ..LoginView::default()
            },
        )
        .0;
        assert!(page.contains("Choose a new password"));
        assert!(page.contains("action=\"/login?type=recovery&amp;session=link\""));
        assert!(!page.contains("rt-secret"));
    }

    #[test]
    fn test_callback_page_is_static() {
        let page = callback_page().0;
        assert_eq!(page, callback_page().0);
        assert!(page.contains("window.location.hash"));
        assert_eq!(page.matches("<script>").count(), 1);
    }

    #[test]
    fn test_dashboard_escapes_user() {
        let user = UserRecord::new("u1", Some("<b>@example.com".to_string()));
        assert!(dashboard_page(&user).0.contains("&lt;b&gt;@example.com"));
    }
}
