use axum::response::{Html, IntoResponse};

/// 首页：鸢尾花表单和花卉图片上传
pub async fn index_handler() -> impl IntoResponse {
    Html(include_str!("../../templates/index.html"))
}
