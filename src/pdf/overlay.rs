use image::RgbaImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};

use super::{ComposeError, ComposeResult, PAGE_HEIGHT, PAGE_WIDTH};

const FONT_RESOURCE: &[u8] = b"F1";
const FONT_SIZE: i64 = 12;

/// One thing to paint on an overlay page. Coordinates are PDF points from
/// the bottom-left corner of the page.
#[derive(Debug, Clone)]
pub enum DrawInstruction {
    Text {
        text: String,
        x: i64,
        y: i64,
    },
    Image {
        image: RasterImage,
        x: i64,
        y: i64,
        width: i64,
        height: i64,
    },
}

impl DrawInstruction {
    pub fn text(text: impl Into<String>, x: i64, y: i64) -> Self {
        Self::Text {
            text: text.into(),
            x,
            y,
        }
    }
}

/// Decoded 8-bit RGB pixels with an optional alpha plane.
#[derive(Debug, Clone)]
pub struct RasterImage {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

impl RasterImage {
    pub fn from_rgba(image: &RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let pixel_count = (width as usize) * (height as usize);
        let mut rgb = Vec::with_capacity(pixel_count * 3);
        let mut alpha = Vec::with_capacity(pixel_count);
        for pixel in image.pixels() {
            let [r, g, b, a] = pixel.0;
            rgb.extend_from_slice(&[r, g, b]);
            alpha.push(a);
        }
        let opaque = alpha.iter().all(|value| *value == u8::MAX);

        Self {
            width,
            height,
            rgb,
            alpha: (!opaque).then_some(alpha),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }

    /// Moves the pixel planes into image XObjects; the alpha plane, if any,
    /// becomes a soft mask.
    fn into_xobject(self, doc: &mut Document) -> Stream {
        let Self {
            width,
            height,
            rgb,
            alpha,
        } = self;
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => Object::Integer(width.into()),
            "Height" => Object::Integer(height.into()),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => Object::Integer(8),
        };
        if let Some(alpha) = alpha {
            let mask = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => Object::Integer(width.into()),
                    "Height" => Object::Integer(height.into()),
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => Object::Integer(8),
                },
                alpha,
            );
            let mask_id = doc.add_object(mask);
            dict.set("SMask", Object::Reference(mask_id));
        }
        Stream::new(dict, rgb)
    }
}

/// A standalone single-page document holding rendered overlay content.
#[derive(Debug, Clone)]
pub struct Overlay {
    document: Document,
}

impl Overlay {
    /// Renders `instructions` in order onto a new letter-sized page. Later
    /// instructions paint over earlier ones.
    pub fn build(instructions: Vec<DrawInstruction>) -> ComposeResult<Self> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut operations = Vec::new();
        let mut fonts = Dictionary::new();
        let mut xobjects = Dictionary::new();

        for instruction in instructions {
            match instruction {
                DrawInstruction::Text { text, x, y } => {
                    if fonts.is_empty() {
                        let font_id = doc.add_object(dictionary! {
                            "Type" => "Font",
                            "Subtype" => "Type1",
                            "BaseFont" => "Helvetica",
                            "Encoding" => "WinAnsiEncoding",
                        });
                        fonts.set(FONT_RESOURCE, Object::Reference(font_id));
                    }
                    operations.extend([
                        Operation::new("BT", vec![]),
                        Operation::new(
                            "Tf",
                            vec![
                                Object::Name(FONT_RESOURCE.to_vec()),
                                Object::Integer(FONT_SIZE),
                            ],
                        ),
                        Operation::new("Td", vec![Object::Integer(x), Object::Integer(y)]),
                        Operation::new("Tj", vec![Object::string_literal(win_ansi(&text))]),
                        Operation::new("ET", vec![]),
                    ]);
                }
                DrawInstruction::Image {
                    image,
                    x,
                    y,
                    width,
                    height,
                } => {
                    let name = format!("Im{}", xobjects.len() + 1);
                    let stream = image.into_xobject(&mut doc);
                    let image_id = doc.add_object(stream);
                    xobjects.set(name.clone(), Object::Reference(image_id));
                    operations.extend([
                        Operation::new("q", vec![]),
                        Operation::new(
                            "cm",
                            vec![
                                Object::Integer(width),
                                Object::Integer(0),
                                Object::Integer(0),
                                Object::Integer(height),
                                Object::Integer(x),
                                Object::Integer(y),
                            ],
                        ),
                        Operation::new("Do", vec![Object::Name(name.into_bytes())]),
                        Operation::new("Q", vec![]),
                    ]);
                }
            }
        }

        let content = Content { operations }
            .encode()
            .map_err(|err| ComposeError::Serialization(format!("overlay content: {err}")))?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

        let mut resources = Dictionary::new();
        if !fonts.is_empty() {
            resources.set("Font", Object::Dictionary(fonts));
        }
        if !xobjects.is_empty() {
            resources.set("XObject", Object::Dictionary(xobjects));
        }

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => page_box(),
            "Resources" => Object::Dictionary(resources),
            "Contents" => Object::Reference(content_id),
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => Object::Integer(1),
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        Ok(Self { document: doc })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Empties the page tree, leaving a document no page can be taken from.
    #[cfg(test)]
    pub(crate) fn strip_pages_for_test(&mut self) {
        for object in self.document.objects.values_mut() {
            if matches!(object.type_name(), Ok("Pages")) {
                if let Ok(dict) = object.as_dict_mut() {
                    dict.set("Kids", Object::Array(Vec::new()));
                    dict.set("Count", Object::Integer(0));
                }
            }
        }
    }

    pub fn to_bytes(&self) -> ComposeResult<Vec<u8>> {
        let mut doc = self.document.clone();
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|err| ComposeError::Serialization(err.to_string()))?;
        Ok(bytes)
    }
}

pub(crate) fn page_box() -> Vec<Object> {
    vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(PAGE_WIDTH),
        Object::Integer(PAGE_HEIGHT),
    ]
}

/// Encodes text for a WinAnsi simple font. WinAnsi agrees with Latin-1 for
/// every printable code point we map; anything else becomes `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match u32::from(ch) {
            code @ 0x20..=0x7e | code @ 0xa0..=0xff => code as u8,
            _ => b'?',
        })
        .collect()
}
