use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document as PdfDocument, Object, Stream};
use pdf_line_search_core::{
    delete_document, document_lines, get_document, ingest_pdf, list_documents, AppContext,
    DocumentError, EngineConfig, ExtractionError, IngestError, SearchCoordinator, SearchQuery,
};
use std::path::Path;
use tempfile::tempdir;

fn build_pdf(pages: &[Vec<(i64, i64, String)>]) -> Vec<u8> {
    let mut doc = PdfDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for spans in pages {
        let mut operations = Vec::new();
        for (x, y, text) in spans {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
            operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(text.as_str())]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("content should encode"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("pdf should serialize");
    bytes
}

fn employee_directory() -> Vec<u8> {
    let spans: &[(i64, i64, &str)] = &[
        (72, 720, "Employee Directory"),
        (72, 690, "ID"),
        (150, 690, "Name"),
        (260, 690, "Dept"),
        (380, 690, "Salary"),
        (72, 670, "EMP001"),
        (150, 670, "John Smith"),
        (260, 670, "Engineering"),
        (380, 670, "$85,000"),
        (72, 650, "EMP004"),
        (260, 650, "Sales"),
        (380, 650, "$60,000"),
        (72, 600, "Ok"),
    ];
    let page: Vec<(i64, i64, String)> = spans
        .iter()
        .map(|(x, y, text)| (*x, *y, text.to_string()))
        .collect();
    build_pdf(&[page])
}

fn site_log(lines: usize) -> Vec<u8> {
    let spans: Vec<(i64, i64, String)> = (0..lines)
        .map(|index| {
            (
                72,
                760 - 14 * index as i64,
                format!("Inspection note {:02}: ponding water near gate {}", index + 1, index % 7),
            )
        })
        .collect();
    build_pdf(&[spans])
}

async fn context(data_dir: &Path) -> AppContext {
    AppContext::local(EngineConfig::default(), Some(data_dir))
        .await
        .expect("local context should open")
}

#[tokio::test]
async fn upload_then_list_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let context = context(dir.path()).await;

    let uploaded = ingest_pdf(&context, "directory.pdf", employee_directory()).await?;
    assert_eq!(uploaded.lines_processed, 4);

    let documents = list_documents(&context).await?;
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].document_id, uploaded.document_id);
    assert_eq!(documents[0].filename, "directory.pdf");
    assert_eq!(documents[0].line_count, 4);

    let lines = document_lines(&context, &uploaded.document_id).await?;
    let texts: Vec<&str> = lines.iter().map(|line| line.text.as_str()).collect();
    assert_eq!(
        texts,
        vec![
            "Employee Directory",
            "ID | Name | Dept | Salary",
            "EMP001 | John Smith | Engineering | $85,000",
            "EMP004 | | Sales | $60,000",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn table_row_is_one_search_result() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let context = context(dir.path()).await;
    let uploaded = ingest_pdf(&context, "directory.pdf", employee_directory()).await?;

    let coordinator = SearchCoordinator::new(context.clone());
    let response = coordinator
        .search(&SearchQuery::new("John Smith Engineering", 10, 0.0))
        .await?;

    assert_eq!(response.results[0].document_id, uploaded.document_id);
    assert_eq!(
        response.results[0].text_fragment,
        "EMP001 | John Smith | Engineering | $85,000"
    );
    let row_hits = response
        .results
        .iter()
        .filter(|result| result.text_fragment.contains("EMP001"))
        .count();
    assert_eq!(row_hits, 1);
    assert!(response
        .results
        .iter()
        .all(|result| (0.0..=1.0).contains(&result.similarity_score)));
    Ok(())
}

#[tokio::test]
async fn deleted_document_disappears_from_search() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let context = context(dir.path()).await;
    let log = ingest_pdf(&context, "site-log.pdf", site_log(50)).await?;
    let directory = ingest_pdf(&context, "directory.pdf", employee_directory()).await?;
    assert_eq!(log.lines_processed, 50);

    let coordinator = SearchCoordinator::new(context.clone());
    let before = coordinator
        .search(&SearchQuery::new("ponding water", 10, 0.0))
        .await?;
    assert!(before
        .results
        .iter()
        .any(|result| result.document_id == log.document_id));

    let deleted = delete_document(&context, &log.document_id).await?;
    assert_eq!(deleted.rows_removed, 50);

    let after = coordinator
        .search(&SearchQuery::new("ponding water", 100, 0.0))
        .await?;
    assert!(after
        .results
        .iter()
        .all(|result| result.document_id == directory.document_id));

    assert_eq!(delete_document(&context, &log.document_id).await?.rows_removed, 0);
    assert!(matches!(
        get_document(&context, &log.document_id).await,
        Err(DocumentError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn documents_survive_restart() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let uploaded = {
        let context = context(dir.path()).await;
        ingest_pdf(&context, "site-log.pdf", site_log(5)).await?
    };

    let context = context(dir.path()).await;
    let document = get_document(&context, &uploaded.document_id).await?;
    assert_eq!(document.line_count, 5);

    let response = SearchCoordinator::new(context)
        .search(&SearchQuery::new("Inspection note 03", 1, 0.0))
        .await?;
    assert_eq!(response.number_of_results, 1);
    assert_eq!(response.results[0].document_id, uploaded.document_id);
    Ok(())
}

#[tokio::test]
async fn unreadable_and_empty_pdfs_fail_differently() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let context = context(dir.path()).await;

    let corrupt = ingest_pdf(&context, "broken.pdf", b"%PDF-1.4\n%broken".to_vec()).await;
    assert!(matches!(
        corrupt,
        Err(IngestError::Extraction(ExtractionError::Corrupt(_)))
    ));

    let blank = ingest_pdf(&context, "blank.pdf", build_pdf(&[Vec::new()])).await;
    assert!(matches!(
        blank,
        Err(IngestError::Extraction(ExtractionError::Empty { pages: 1 }))
    ));

    assert!(list_documents(&context).await?.is_empty());
    Ok(())
}
