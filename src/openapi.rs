use crate::forms::{CommentForm, PostForm};
use crate::models::{Comment, Group, NewGroup, Post, User};
use crate::pagination::PostPage;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::feed,
        crate::routes::group_feed,
        crate::routes::followed_feed,
        crate::routes::list_groups,
        crate::routes::create_group,
        crate::routes::create_post,
        crate::routes::profile,
        crate::routes::post_detail,
        crate::routes::upload_image,
    ),
    components(schemas(
        User, Group, NewGroup, Post, Comment,
        PostForm, CommentForm, PostPage,
        crate::routes::GroupFeed, crate::routes::ProfileView,
        crate::routes::PostDetail, crate::routes::PostFormView,
        crate::routes::ImageUploadResponse
    )),
    tags(
        (name = "posts", description = "Post feeds, creation and editing"),
        (name = "groups", description = "Group directory and feeds"),
        (name = "follows", description = "Follow graph and the personal feed"),
    )
)]
pub struct ApiDoc;
