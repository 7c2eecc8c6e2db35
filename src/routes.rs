use std::sync::Arc;

use actix_web::http::header;
use actix_web::{web, HttpResponse};
use actix_multipart::Multipart;
use futures_util::TryStreamExt as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::forms::{CommentForm, PostForm};
use crate::models::*;
use crate::pagination::{paginate, Page, PostPage};
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::storage::{ImageStore, ImageStoreError};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/posts").route(web::get().to(feed)))
            .service(
                web::resource("/posts/new")
                    .route(web::get().to(new_post_form))
                    .route(web::post().to(create_post)),
            )
            .service(
                web::resource("/groups")
                    .route(web::get().to(list_groups))
                    .route(web::post().to(create_group)),
            )
            .service(web::resource("/groups/{slug}").route(web::get().to(group_feed)))
            .service(web::resource("/follow").route(web::get().to(followed_feed)))
            .service(web::resource("/users/{username}").route(web::get().to(profile)))
            .service(
                web::resource("/users/{username}/follow")
                    .route(web::get().to(follow_author))
                    .route(web::post().to(follow_author)),
            )
            .service(
                web::resource("/users/{username}/unfollow")
                    .route(web::get().to(unfollow_author))
                    .route(web::post().to(unfollow_author)),
            )
            .service(web::resource("/users/{username}/posts/{id}").route(web::get().to(post_detail)))
            .service(
                web::resource("/users/{username}/posts/{id}/edit")
                    .route(web::get().to(edit_post_form))
                    .route(web::post().to(edit_post)),
            )
            .service(
                web::resource("/users/{username}/posts/{id}/comment")
                    .route(web::post().to(add_comment)),
            )
            .service(web::resource("/images").route(web::post().to(upload_image))),
    );
    // public fetch route (no /api/v1 prefix so <img src="/images/{hash}"> works)
    cfg.route("/images/{hash}", web::get().to(get_image));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub images: Arc<dyn ImageStore>,
    pub limits: RateLimiterFacade,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
}

impl PageQuery {
    // Anything unparseable counts as "no page requested" and lands on page 1.
    fn number(&self) -> Option<usize> {
        self.page.as_deref().and_then(|p| p.parse().ok())
    }
}

/// Run a form's checks, packaging failures with the submitted values so
/// the client can re-render the form. Nothing is persisted on failure.
fn validated<F: Validate + Serialize>(form: &F) -> Result<(), ApiError> {
    form.validate().map_err(|errors| ApiError::Validation {
        errors,
        form: serde_json::to_value(form).unwrap_or_default(),
    })
}

fn redirect_to(location: String) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, location))
        .finish()
}

fn feed_url() -> String {
    "/api/v1/posts".to_string()
}

fn profile_url(username: &str) -> String {
    format!("/api/v1/users/{username}")
}

fn post_url(username: &str, post_id: Id) -> String {
    format!("/api/v1/users/{username}/posts/{post_id}")
}

// ---------------- Feeds -----------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/posts",
    params(("page" = Option<String>, Query, description = "1-based page number, clamped to range")),
    responses(
        (status = 200, description = "Page of all posts, newest first", body = PostPage)
    )
)]
pub async fn feed(data: web::Data<AppState>, q: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let posts = data.repo.list_posts().await?;
    Ok(HttpResponse::Ok().json(paginate(&posts, q.number())))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupFeed {
    pub group: Group,
    #[schema(value_type = PostPage)]
    pub page: Page<Post>,
}

#[utoipa::path(
    get,
    path = "/api/v1/groups/{slug}",
    params(
        ("slug" = String, Path, description = "Group slug"),
        ("page" = Option<String>, Query, description = "1-based page number")
    ),
    responses(
        (status = 200, description = "Group metadata plus its page of posts", body = GroupFeed),
        (status = 404, description = "No group with that slug")
    )
)]
pub async fn group_feed(
    data: web::Data<AppState>,
    path: web::Path<String>,
    q: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let group = data.repo.get_group_by_slug(&path.into_inner()).await?;
    let posts = data.repo.list_group_posts(group.id).await?;
    let page = paginate(&posts, q.number());
    Ok(HttpResponse::Ok().json(GroupFeed { group, page }))
}

#[utoipa::path(
    get,
    path = "/api/v1/follow",
    params(("page" = Option<String>, Query, description = "1-based page number")),
    responses(
        (status = 200, description = "Page of posts by followed authors", body = PostPage),
        (status = 302, description = "Anonymous; redirected to login")
    )
)]
pub async fn followed_feed(
    auth: Auth,
    data: web::Data<AppState>,
    q: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let me = data.repo.ensure_user(&auth.0.username).await?;
    let posts = data.repo.list_followed_posts(me.id).await?;
    Ok(HttpResponse::Ok().json(paginate(&posts, q.number())))
}

// ---------------- Groups ----------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/groups",
    responses((status = 200, description = "All groups", body = [Group]))
)]
pub async fn list_groups(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let groups = data.repo.list_groups().await?;
    Ok(HttpResponse::Ok().json(groups))
}

#[utoipa::path(
    post,
    path = "/api/v1/groups",
    request_body = NewGroup,
    responses(
        (status = 201, description = "Group created", body = Group),
        (status = 403, description = "Forbidden – Admins only"),
        (status = 409, description = "Slug already taken")
    )
)]
pub async fn create_group(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewGroup>,
) -> Result<HttpResponse, ApiError> {
    if !auth.0.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let group = data.repo.create_group(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(group))
}

// ---------------- Posts -----------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct PostFormView {
    pub form: PostForm,
    pub groups: Vec<Group>,
}

pub async fn new_post_form(_auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let groups = data.repo.list_groups().await?;
    Ok(HttpResponse::Ok().json(PostFormView { form: PostForm::empty(), groups }))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/new",
    request_body = PostForm,
    responses(
        (status = 302, description = "Created; redirected to the feed"),
        (status = 400, description = "Validation failed; field errors plus the submitted form"),
        (status = 404, description = "Unknown group selected"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_post(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<PostForm>,
) -> Result<HttpResponse, ApiError> {
    let form = payload.into_inner();
    validated(&form)?;
    if !data.limits.allow_post(&auth.0.username) {
        return Err(ApiError::RateLimited);
    }
    // authorship comes from the session, never from the payload
    let me = data.repo.ensure_user(&auth.0.username).await?;
    let new = NewPost {
        text: form.text,
        group_id: form.group,
        image_hash: form.image_hash,
        mime: form.mime,
    };
    data.repo.create_post(me.id, new).await?;
    Ok(redirect_to(feed_url()))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileView {
    pub author: User,
    pub post_count: usize,
    /// True only when the session user actually follows this author.
    pub following: bool,
    #[schema(value_type = PostPage)]
    pub page: Page<Post>,
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{username}",
    params(
        ("username" = String, Path, description = "Author username"),
        ("page" = Option<String>, Query, description = "1-based page number")
    ),
    responses(
        (status = 200, description = "Author, their posts and follow state", body = ProfileView),
        (status = 404, description = "No such user")
    )
)]
pub async fn profile(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
    q: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let author = data.repo.get_user_by_username(&path.into_inner()).await?;
    let posts = data.repo.list_author_posts(author.id).await?;
    let following = match &auth {
        Some(a) if a.0.username != author.username => {
            match data.repo.get_user_by_username(&a.0.username).await {
                Ok(me) => data.repo.is_following(me.id, author.id).await?,
                // the session user has never written anything here, so no edges
                Err(_) => false,
            }
        }
        _ => false,
    };
    let page = paginate(&posts, q.number());
    Ok(HttpResponse::Ok().json(ProfileView { post_count: posts.len(), author, following, page }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PostDetail {
    pub post: Post,
    pub author: User,
    /// Total number of posts by this author, not just the ones on a page.
    pub post_count: usize,
    pub comments: Vec<Comment>,
    pub form: CommentForm,
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{username}/posts/{id}",
    params(
        ("username" = String, Path, description = "Author username"),
        ("id" = Id, Path, description = "Post id")
    ),
    responses(
        (status = 200, description = "Post with comments and a blank comment form", body = PostDetail),
        (status = 404, description = "No such author, or the post is not theirs")
    )
)]
pub async fn post_detail(
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (username, post_id) = path.into_inner();
    let author = data.repo.get_user_by_username(&username).await?;
    let post = data.repo.get_author_post(author.id, post_id).await?;
    let post_count = data.repo.count_author_posts(author.id).await?;
    let comments = data.repo.list_comments(post.id).await?;
    Ok(HttpResponse::Ok().json(PostDetail {
        post,
        author,
        post_count,
        comments,
        form: CommentForm::empty(),
    }))
}

pub async fn edit_post_form(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (username, post_id) = path.into_inner();
    let author = data.repo.get_user_by_username(&username).await?;
    let post = data.repo.get_author_post(author.id, post_id).await?;
    // not the author: quietly send them to the post instead of an error page
    if auth.0.username != author.username {
        return Ok(redirect_to(post_url(&author.username, post.id)));
    }
    let groups = data.repo.list_groups().await?;
    Ok(HttpResponse::Ok().json(PostFormView { form: PostForm::from_post(&post), groups }))
}

pub async fn edit_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
    payload: web::Json<PostForm>,
) -> Result<HttpResponse, ApiError> {
    let (username, post_id) = path.into_inner();
    let author = data.repo.get_user_by_username(&username).await?;
    let post = data.repo.get_author_post(author.id, post_id).await?;
    if auth.0.username != author.username {
        return Ok(redirect_to(post_url(&author.username, post.id)));
    }
    let form = payload.into_inner();
    validated(&form)?;
    let upd = UpdatePost { text: form.text, group_id: form.group };
    data.repo.update_post(post.id, upd).await?;
    Ok(redirect_to(post_url(&author.username, post.id)))
}

// ---------------- Comments --------------------------------------------

pub async fn add_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
    payload: web::Json<CommentForm>,
) -> Result<HttpResponse, ApiError> {
    let (username, post_id) = path.into_inner();
    let author = data.repo.get_user_by_username(&username).await?;
    let post = data.repo.get_author_post(author.id, post_id).await?;
    let form = payload.into_inner();
    validated(&form)?;
    if !data.limits.allow_comment(&auth.0.username) {
        return Err(ApiError::RateLimited);
    }
    let me = data.repo.ensure_user(&auth.0.username).await?;
    data.repo.create_comment(post.id, me.id, form.text).await?;
    Ok(redirect_to(post_url(&author.username, post.id)))
}

// ---------------- Follow graph ----------------------------------------

pub async fn follow_author(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let target = data.repo.get_user_by_username(&path.into_inner()).await?;
    // self-follow is a silent no-op
    if target.username != auth.0.username {
        let me = data.repo.ensure_user(&auth.0.username).await?;
        data.repo.follow(me.id, target.id).await?;
    }
    Ok(redirect_to(profile_url(&target.username)))
}

pub async fn unfollow_author(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let target = data.repo.get_user_by_username(&path.into_inner()).await?;
    let me = data.repo.ensure_user(&auth.0.username).await?;
    data.repo.unfollow(me.id, target.id).await?;
    Ok(redirect_to(profile_url(&target.username)))
}

// ---------------- Images ----------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct ImageUploadResponse {
    pub hash: String,
    pub mime: String,
    pub size: usize,
    pub duplicate: bool, // true when upload was a duplicate (idempotent)
}

const IMAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[utoipa::path(
    post,
    path = "/api/v1/images",
    responses(
        (status = 201, description = "Image stored (new)", body = ImageUploadResponse),
        (status = 200, description = "Image already existed (idempotent)", body = ImageUploadResponse),
        (status = 415, description = "Unsupported media type"),
        (status = 413, description = "Payload too large"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn upload_image(
    auth: Auth,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    if !data.limits.allow_image(&auth.0.username) {
        return Err(ApiError::RateLimited);
    }
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        if let Some(name) = field.content_disposition().get_name() {
            if name != "file" {
                continue;
            }
        } else {
            continue;
        }
        let mut field_stream = field;
        let mut hasher = Sha256::new();
        while let Some(chunk) = field_stream.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > IMAGE_SIZE_LIMIT {
                return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish());
            }
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        let hash = format!("{:x}", hasher.finalize());
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_MIME.contains(&mime.as_str()) {
            return Ok(HttpResponse::UnsupportedMediaType().finish());
        }
        let (status_code, duplicate_flag) = match data.images.save(&hash, &mime, &bytes).await {
            Ok(()) => (StatusCode::CREATED, false),
            Err(ImageStoreError::Duplicate) => (StatusCode::OK, true),
            Err(e) => {
                log::error!("image store save error: {e}");
                return Err(ApiError::Internal);
            }
        };
        let resp = ImageUploadResponse { hash, mime, size: bytes.len(), duplicate: duplicate_flag };
        return Ok(HttpResponse::build(status_code).json(resp));
    }
    Ok(HttpResponse::BadRequest().finish())
}

/// Serve a stored image by hash.
pub async fn get_image(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let hash = path.into_inner();
    if hash.len() < 2 {
        return Err(ApiError::NotFound);
    }
    match data.images.load(&hash).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok()
            .insert_header(("Content-Type", mime))
            .body(bytes)),
        Err(ImageStoreError::NotFound) => Err(ApiError::NotFound),
        Err(e) => {
            log::error!("image store load error: {e}");
            Err(ApiError::Internal)
        }
    }
}

// ---------------- Error responders ------------------------------------

/// Default service for unmatched routes.
pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "error": "not found" }))
}
