mod common;

use std::collections::BTreeMap;

use common::{base_time, minutes, setup_db};
use craftchat_service::customization::{CustomizationService, NewCustomization, RenderError};
use craftchat_service::entity::template;
use craftchat_service::templates::{NewTemplate, SortBy, TemplateCatalog, TemplateQuery};
use craftchat_service::ServiceError;

fn new_template(title: &str, category: &str, content: &str) -> NewTemplate {
    NewTemplate {
        title: title.to_string(),
        description: Some(format!("{title} for everyday use")),
        category: category.to_string(),
        content: content.to_string(),
        author_id: Some("author-1".to_string()),
        is_public: true,
    }
}

fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn create_registers_version_one() {
    let db = setup_db().await;
    let catalog = TemplateCatalog::new(db);

    let created = catalog
        .create(new_template("Tenancy Agreement", "property", "Landlord: {{landlord}}"), base_time())
        .await
        .unwrap();

    assert_eq!(created.current_version, 1);
    assert_eq!(created.rating_count, 0);
    assert_eq!(catalog.get(&created.id).await.unwrap(), created);

    let versions = catalog.versions(&created.id).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, 1);
    assert_eq!(versions[0].content, "Landlord: {{landlord}}");
}

#[tokio::test]
async fn blank_title_is_rejected() {
    let db = setup_db().await;
    let catalog = TemplateCatalog::new(db);

    let err = catalog
        .create(new_template("   ", "property", "x"), base_time())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn ratings_keep_a_running_mean() {
    let db = setup_db().await;
    let catalog = TemplateCatalog::new(db);
    let created = catalog
        .create(new_template("Will", "estate", "x"), base_time())
        .await
        .unwrap();

    catalog.rate(&created.id, 5).await.unwrap();
    let rated = catalog.rate(&created.id, 2).await.unwrap();
    assert_eq!(rated.rating_count, 2);
    assert!((rated.rating_average - 3.5).abs() < 1e-9);

    assert!(matches!(
        catalog.rate(&created.id, 0).await,
        Err(ServiceError::InvalidInput(_))
    ));
    assert!(matches!(
        catalog.rate(&created.id, 6).await,
        Err(ServiceError::InvalidInput(_))
    ));
    assert!(matches!(
        catalog.rate("missing", 4).await,
        Err(ServiceError::NotFound { .. })
    ));
}

#[tokio::test]
async fn rating_sort_is_non_increasing() {
    let db = setup_db().await;
    let catalog = TemplateCatalog::new(db);

    let ratings: [&[u8]; 5] = [&[3], &[5, 4], &[1, 2, 2], &[], &[5]];
    for (i, stars) in ratings.iter().enumerate() {
        let created = catalog
            .create(
                new_template(&format!("Template {i}"), "general", "x"),
                base_time() + minutes(i as i64),
            )
            .await
            .unwrap();
        for star in stars.iter() {
            catalog.rate(&created.id, *star).await.unwrap();
        }
    }

    let results = catalog
        .search(&TemplateQuery {
            sort_by: SortBy::Rating,
            ..TemplateQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert!(results
        .windows(2)
        .all(|pair| pair[0].rating_average >= pair[1].rating_average));
    let titles: Vec<_> = results.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Template 4", "Template 1", "Template 0", "Template 2", "Template 3"]
    );
}

#[tokio::test]
async fn search_filters_by_text_category_and_visibility() {
    let db = setup_db().await;
    let catalog = TemplateCatalog::new(db);
    let now = base_time();

    catalog
        .create(new_template("Employment Contract", "employment", "x"), now)
        .await
        .unwrap();
    catalog
        .create(new_template("Consulting Contract", "business", "x"), now)
        .await
        .unwrap();
    catalog
        .create(new_template("Lasting Power of Attorney", "estate", "x"), now)
        .await
        .unwrap();
    let mut hidden = new_template("Draft Contract", "business", "x");
    hidden.is_public = false;
    catalog.create(hidden, now).await.unwrap();

    let by_text = catalog
        .search(&TemplateQuery {
            text: Some("Contract".into()),
            sort_by: SortBy::Title,
            ..TemplateQuery::default()
        })
        .await
        .unwrap();
    let titles: Vec<_> = by_text.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Consulting Contract", "Employment Contract"]);

    let by_category = catalog
        .search(&TemplateQuery {
            category: Some("business".into()),
            ..TemplateQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(by_category.len(), 1);
    assert_eq!(by_category[0].title, "Consulting Contract");

    let paged = catalog
        .search(&TemplateQuery {
            sort_by: SortBy::Title,
            limit: Some(2),
            offset: Some(1),
            ..TemplateQuery::default()
        })
        .await
        .unwrap();
    let titles: Vec<_> = paged.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Employment Contract", "Lasting Power of Attorney"]);
}

#[tokio::test]
async fn popular_orders_by_downloads() {
    let db = setup_db().await;
    let catalog = TemplateCatalog::new(db);
    let now = base_time();

    for (title, downloads) in [("A", 1), ("B", 4), ("C", 2)] {
        let created = catalog
            .create(new_template(title, "general", "x"), now)
            .await
            .unwrap();
        for _ in 0..downloads {
            catalog.record_download(&created.id).await.unwrap();
        }
    }

    let popular: Vec<template::Model> = catalog.popular(2).await.unwrap();
    let titles: Vec<_> = popular.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["B", "C"]);
    assert_eq!(popular[0].download_count, 4);
}

#[tokio::test]
async fn publishing_appends_versions_and_updates_content() {
    let db = setup_db().await;
    let catalog = TemplateCatalog::new(db);
    let created = catalog
        .create(new_template("NDA", "business", "v1 {{party}}"), base_time())
        .await
        .unwrap();

    let v2 = catalog
        .publish_version(&created.id, "v2 {{party}}".into(), Some("Clarify term".into()), base_time() + minutes(5))
        .await
        .unwrap();
    let v3 = catalog
        .publish_version(&created.id, "v3 {{party}}".into(), None, base_time() + minutes(10))
        .await
        .unwrap();

    assert_eq!((v2.version, v3.version), (2, 3));
    let current = catalog.get(&created.id).await.unwrap();
    assert_eq!(current.current_version, 3);
    assert_eq!(current.content, "v3 {{party}}");

    let versions: Vec<i32> = catalog
        .versions(&created.id)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);

    assert!(matches!(
        catalog.publish_version("missing", "x".into(), None, base_time()).await,
        Err(ServiceError::NotFound { .. })
    ));
}

#[tokio::test]
async fn customization_renders_its_pinned_version() {
    let db = setup_db().await;
    let catalog = TemplateCatalog::new(db.clone());
    let customizations = CustomizationService::new(db, catalog.clone());

    let created = catalog
        .create(
            new_template("Demand Letter", "disputes", "Dear {{ debtor }}, pay {{amount}}."),
            base_time(),
        )
        .await
        .unwrap();

    let saved = customizations
        .save(
            NewCustomization {
                template_id: created.id.clone(),
                user_id: "user-1".into(),
                values: values(&[("debtor", "Mr Tan"), ("amount", "S$1,200")]),
            },
            base_time(),
        )
        .await
        .unwrap();
    assert_eq!(saved.template_version, 1);

    catalog
        .publish_version(&created.id, "Final notice to {{debtor}}.".into(), None, base_time())
        .await
        .unwrap();

    let document = customizations.render(&saved.id).await.unwrap();
    assert_eq!(document.content, "Dear Mr Tan, pay S$1,200.");
    assert_eq!(document.file_name, "demand-letter.txt");
    assert_eq!(catalog.get(&created.id).await.unwrap().download_count, 1);
}

#[tokio::test]
async fn customization_with_missing_values_fails_to_render() {
    let db = setup_db().await;
    let catalog = TemplateCatalog::new(db.clone());
    let customizations = CustomizationService::new(db, catalog.clone());

    let created = catalog
        .create(new_template("Affidavit", "court", "I, {{name}}, of {{address}}"), base_time())
        .await
        .unwrap();
    let saved = customizations
        .save(
            NewCustomization {
                template_id: created.id.clone(),
                user_id: "user-1".into(),
                values: values(&[("name", "Lim")]),
            },
            base_time(),
        )
        .await
        .unwrap();

    let err = customizations.render(&saved.id).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Render(RenderError::MissingVariables(ref names)) if names == &vec!["address".to_string()]
    ));

    customizations
        .update_values(
            &saved.id,
            values(&[("name", "Lim"), ("address", "1 Raffles Place")]),
            base_time() + minutes(1),
        )
        .await
        .unwrap();
    let document = customizations.render(&saved.id).await.unwrap();
    assert_eq!(document.content, "I, Lim, of 1 Raffles Place");
}
