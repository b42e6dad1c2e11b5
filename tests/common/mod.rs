use std::env;
use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use contract_desk::config::AppConfig;
use contract_desk::db::{self, PgPool};
use contract_desk::routes;
use contract_desk::state::AppState;
use diesel::connection::SimpleConnection;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use lopdf::content::Content;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Router over the in-process stores.
#[allow(dead_code)]
pub struct TestApp {
    pub state: AppState,
    router: Router,
}

#[allow(dead_code)]
impl TestApp {
    pub fn new() -> Self {
        let state = AppState::in_memory(AppConfig::in_memory());
        let router = routes::create_router(state.clone());
        Self { state, router }
    }

    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        self.send(request).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(payload)?))?;
        self.send(request).await
    }

    pub async fn post_empty(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Body::empty())?;
        self.send(request).await
    }

    pub async fn upload_template(
        &self,
        filename: &str,
        data: &[u8],
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"contract_pdf\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend(b"Content-Type: application/pdf\r\n\r\n");
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/templates")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))?;
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> Result<T> {
    let bytes = body_to_vec(body).await?;
    serde_json::from_slice(&bytes).context("response body is not the expected JSON")
}

/// Pool for the PostgreSQL store tests, or `None` when `TEST_DATABASE_URL`
/// is unset. Runs migrations and empties every table.
#[allow(dead_code)]
pub async fn test_pool() -> Result<Option<PgPool>> {
    let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping PostgreSQL test");
        return Ok(None);
    };
    let pool = db::init_pool_with_size(&database_url, 8)?;
    let prepared = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&prepared)?;
        let mut conn = prepared
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.batch_execute(
            "TRUNCATE TABLE active_template, personalized_contracts, contract_templates RESTART IDENTITY CASCADE;",
        )
        .context("failed to truncate tables")?;
        Ok(())
    })
    .await
    .context("database preparation task panicked")??;
    Ok(Some(pool))
}

#[allow(dead_code)]
pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

/// Letter-sized PDF with one text line per page.
#[allow(dead_code)]
pub fn sample_pdf(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });

    let kids: Vec<Object> = lines
        .iter()
        .map(|line| {
            let content = format!("BT /F1 14 Tf 72 740 Td ({line}) Tj ET");
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ],
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => Object::Reference(font_id) },
                },
                "Contents" => Object::Reference(content_id),
            });
            Object::Reference(page_id)
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => Object::Integer(kids.len() as i64),
            "Kids" => kids,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture serializes");
    bytes
}

#[allow(dead_code)]
pub fn signature_data_uri() -> String {
    let mut pixels = RgbaImage::from_pixel(40, 20, Rgba([255, 255, 255, 0]));
    for x in 0..40 {
        pixels.put_pixel(x, 10, Rgba([0, 0, 0, 255]));
    }
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(pixels)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("png encodes");
    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
}

/// What a page paints: text runs in order and the number of raster images.
#[allow(dead_code)]
#[derive(Debug, Default, PartialEq)]
pub struct PageDrawing {
    pub text: Vec<String>,
    pub images: usize,
}

#[allow(dead_code)]
pub fn page_drawings(bytes: &[u8]) -> Vec<PageDrawing> {
    let doc = Document::load_mem(bytes).expect("valid pdf");
    doc.get_pages()
        .into_values()
        .map(|page_id| drawing(&doc, page_id))
        .collect()
}

fn drawing(doc: &Document, page_id: ObjectId) -> PageDrawing {
    let content = doc.get_page_content(page_id).expect("page content");
    let resources = doc
        .get_dictionary(page_id)
        .and_then(|page| page.get(b"Resources"))
        .map(|obj| as_dict(doc, obj))
        .unwrap_or_else(|_| Dictionary::new());
    let mut out = PageDrawing::default();
    collect(doc, &content, &resources, &mut out);
    out
}

fn as_dict(doc: &Document, object: &Object) -> Dictionary {
    match object {
        Object::Dictionary(dict) => dict.clone(),
        Object::Reference(id) => doc
            .get_dictionary(*id)
            .cloned()
            .unwrap_or_else(|_| Dictionary::new()),
        _ => Dictionary::new(),
    }
}

fn collect(doc: &Document, content: &[u8], resources: &Dictionary, out: &mut PageDrawing) {
    let xobjects = resources
        .get(b"XObject")
        .map(|obj| as_dict(doc, obj))
        .unwrap_or_else(|_| Dictionary::new());
    let content = Content::decode(content).expect("decodable content");
    for operation in content.operations {
        match (operation.operator.as_str(), operation.operands.first()) {
            ("Tj", Some(Object::String(bytes, _))) => {
                out.text.push(String::from_utf8_lossy(bytes).into_owned());
            }
            ("Do", Some(Object::Name(name))) => {
                let Ok(id) = xobjects.get(name).and_then(Object::as_reference) else {
                    continue;
                };
                let stream = doc
                    .get_object(id)
                    .and_then(Object::as_stream)
                    .expect("xobject stream");
                match stream.dict.get(b"Subtype").and_then(Object::as_name) {
                    Ok(b"Form") => {
                        let inner = stream
                            .decompressed_content()
                            .unwrap_or_else(|_| stream.content.clone());
                        let form_resources = stream
                            .dict
                            .get(b"Resources")
                            .map(|obj| as_dict(doc, obj))
                            .unwrap_or_else(|_| Dictionary::new());
                        collect(doc, &inner, &form_resources, out);
                    }
                    Ok(b"Image") => out.images += 1,
                    _ => {}
                }
            }
            _ => {}
        }
    }
}
