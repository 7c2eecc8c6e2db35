use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::{Id, Post};

/// User-submitted post fields. There is deliberately no author field;
/// authorship always comes from the session.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PostForm {
    #[validate(length(min = 1, message = "text is required"))]
    pub text: String,
    pub group: Option<Id>,
    pub image_hash: Option<String>,
    pub mime: Option<String>,
}

impl PostForm {
    /// Blank form for the new-post page.
    pub fn empty() -> Self {
        Self { text: String::new(), group: None, image_hash: None, mime: None }
    }

    /// Form pre-populated from an existing post, for the edit page.
    pub fn from_post(post: &Post) -> Self {
        Self {
            text: post.text.clone(),
            group: post.group_id,
            image_hash: post.image_hash.clone(),
            mime: post.mime.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CommentForm {
    #[validate(length(min = 1, message = "text is required"))]
    pub text: String,
}

impl CommentForm {
    pub fn empty() -> Self {
        Self { text: String::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_fails_validation() {
        let form = PostForm { text: String::new(), group: None, image_hash: None, mime: None };
        let errs = form.validate().unwrap_err();
        assert!(errs.field_errors().contains_key("text"));
    }

    #[test]
    fn group_is_optional() {
        let form = PostForm { text: "hello".into(), group: None, image_hash: None, mime: None };
        assert!(form.validate().is_ok());
    }

    #[test]
    fn blank_comment_rejected() {
        assert!(CommentForm { text: String::new() }.validate().is_err());
        assert!(CommentForm { text: "nice".into() }.validate().is_ok());
    }
}
