/// Fixed product-category taxonomy for locale-tolerant category matching.
/// Raw categories arrive in mixed case, English or Russian, and in many
/// wordings; rules compare against these slugs instead of raw strings.

pub struct CategoryDef {
    pub slug: &'static str,
    pub keywords: &'static [&'static str],
}

pub static CATEGORIES: &[CategoryDef] = &[
    CategoryDef {
        slug: "electronics",
        keywords: &["electronics", "electronic", "tech", "gadget", "device", "smartphone", "электроника", "гаджет", "устройство", "смартфон", "телефон", "компьютер"],
    },
    CategoryDef {
        slug: "travel",
        keywords: &["travel", "trip", "tour", "hotel", "airline", "flight", "vacation", "путешеств", "туризм", "отель", "авиабилет", "отпуск", "поездка"],
    },
    CategoryDef {
        slug: "auto",
        keywords: &["auto", "car", "cars", "vehicle", "fuel", "gas", "gasoline", "petrol", "авто", "машина", "автомобиль", "бензин", "топливо", "азс"],
    },
    CategoryDef {
        slug: "real_estate",
        keywords: &["real estate", "property", "house", "apartment", "renovation", "repair", "недвижимость", "квартира", "ремонт", "дом", "интерьер"],
    },
    CategoryDef {
        slug: "sport",
        keywords: &["sport", "fitness", "gym", "football", "soccer", "спорт", "фитнес", "футбол", "тренировка"],
    },
    CategoryDef {
        slug: "health",
        keywords: &["health", "medical", "medicine", "doctor", "hospital", "clinic", "здоровье", "медицина", "врач", "больница", "клиника"],
    },
    CategoryDef {
        slug: "food",
        keywords: &["food", "foodstuff", "beverage", "grocery", "groceries", "supermarket", "restaurant", "cafe", "еда", "продукты", "напитки", "супермаркет", "ресторан", "кафе"],
    },
    CategoryDef {
        slug: "finance",
        keywords: &["finance", "financial", "bank", "investment", "insurance", "broker", "финансы", "банк", "инвестиции", "страхование", "брокер"],
    },
    CategoryDef {
        slug: "retail",
        keywords: &["retail", "shop", "store", "shopping", "розничная", "торговля", "магазин", "шопинг"],
    },
    CategoryDef {
        slug: "clothing",
        keywords: &["clothing", "clothes", "fashion", "apparel", "garment", "одежда", "мода", "гардероб", "платье", "обувь"],
    },
    CategoryDef {
        slug: "children",
        keywords: &["children", "kids", "child", "baby", "toy", "toys", "дети", "детск", "ребенок", "малыш", "игрушк"],
    },
    CategoryDef {
        slug: "beauty",
        keywords: &["beauty", "cosmetics", "cosmetic", "makeup", "perfume", "skincare", "красота", "косметика", "макияж", "парфюмерия"],
    },
    CategoryDef {
        slug: "books",
        keywords: &["books", "book", "literature", "reading", "audiobook", "книги", "книга", "литература"],
    },
    CategoryDef {
        slug: "home_appliances",
        keywords: &["home appliances", "appliance", "household", "refrigerator", "washing machine", "бытовая техника", "холодильник", "стиральная", "микроволновка"],
    },
    CategoryDef {
        slug: "furniture",
        keywords: &["furniture", "sofa", "chair", "table", "bed", "cabinet", "мебель", "диван", "стул", "кровать", "шкаф"],
    },
    CategoryDef {
        slug: "garden",
        keywords: &["garden", "gardening", "plants", "flowers", "seeds", "lawn", "сад", "огород", "растения", "цветы", "семена"],
    },
    CategoryDef {
        slug: "pets",
        keywords: &["pets", "pet", "dog", "cat", "animal", "питомц", "животные", "собака", "кошка", "зоотовары"],
    },
    CategoryDef {
        slug: "entertainment",
        keywords: &["entertainment", "games", "gaming", "video games", "console", "развлечения", "игры", "видеоигры", "приставка"],
    },
    CategoryDef {
        slug: "education",
        keywords: &["education", "learning", "course", "training", "tutoring", "school", "образование", "обучение", "курсы", "тренинг", "школа"],
    },
    CategoryDef {
        slug: "music",
        keywords: &["music", "musical", "guitar", "piano", "музыка", "музыкальн", "гитара", "пианино"],
    },
    CategoryDef {
        slug: "movies",
        keywords: &["movies", "cinema", "film", "dvd", "streaming", "фильм", "кино", "стриминг"],
    },
    CategoryDef {
        slug: "home_textiles",
        keywords: &["home textiles", "textile", "bedding", "linen", "towels", "curtains", "текстиль", "постельное", "полотенца", "шторы"],
    },
    CategoryDef {
        slug: "kitchen",
        keywords: &["kitchen", "cookware", "tableware", "utensils", "dishes", "cutlery", "кухня", "посуда", "кухонн", "тарелки"],
    },
    CategoryDef {
        slug: "tools",
        keywords: &["tools", "tool", "equipment", "hardware", "drill", "screwdriver", "инструмент", "оборудование", "дрель", "отвертка"],
    },
    CategoryDef {
        slug: "construction",
        keywords: &["construction", "building materials", "paint", "wallpaper", "tiles", "строительство", "стройматериалы", "краска", "обои", "плитка"],
    },
    CategoryDef {
        slug: "pharmacy",
        keywords: &["pharmacy", "medicines", "drugs", "vitamins", "supplements", "аптека", "лекарств", "медикаменты", "витамины"],
    },
    CategoryDef {
        slug: "jewelry",
        keywords: &["jewelry", "jewellery", "watch", "ring", "necklace", "bracelet", "украшения", "ювелирн", "часы", "кольцо", "браслет"],
    },
    CategoryDef {
        slug: "sports_goods",
        keywords: &["sports goods", "sportswear", "sports equipment", "fitness equipment", "спорттовары", "спортивная одежда", "спортивное оборудование", "тренажер"],
    },
];

/// Short ASCII keywords ("car", "cat", "gas") only count as whole words.
const WHOLE_WORD_MAX_LEN: usize = 3;

pub fn find_by_slug(slug: &str) -> Option<&'static CategoryDef> {
    CATEGORIES.iter().find(|c| c.slug == slug)
}

fn keyword_hit(raw_lower: &str, keyword: &str) -> bool {
    if keyword.is_ascii() && keyword.len() <= WHOLE_WORD_MAX_LEN {
        raw_lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == keyword)
    } else {
        raw_lower.contains(keyword)
    }
}

/// Map a raw category string to a taxonomy entry.
/// Tries the slug itself first, then the entry with the most keyword hits
/// (earlier entries win ties). `None` when nothing matches.
pub fn normalize_category(raw: &str) -> Option<&'static CategoryDef> {
    let lower = raw.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    let as_slug = lower.replace([' ', '-'], "_");
    if let Some(c) = find_by_slug(&as_slug) {
        return Some(c);
    }

    let mut best: Option<(&CategoryDef, usize)> = None;
    for c in CATEGORIES.iter() {
        let hits = c.keywords.iter().filter(|kw| keyword_hit(&lower, kw)).count();
        if hits > 0 && best.map_or(true, |(_, prev)| hits > prev) {
            best = Some((c, hits));
        }
    }
    best.map(|(c, _)| c)
}

/// Slug for a raw category, or the lowercased input when it is not in the taxonomy
pub fn normalized_slug(raw: &str) -> String {
    match normalize_category(raw) {
        Some(c) => c.slug.to_string(),
        None => raw.trim().to_lowercase(),
    }
}

/// True when `raw` normalizes to `slug` or mentions any of its keywords.
pub fn matches(raw: &str, slug: &str) -> bool {
    if raw.trim().is_empty() {
        return false;
    }
    if normalize_category(raw).is_some_and(|c| c.slug == slug) {
        return true;
    }
    let lower = raw.to_lowercase();
    find_by_slug(slug).is_some_and(|c| c.keywords.iter().any(|kw| keyword_hit(&lower, kw)))
}

/// Taxonomy listing for oracle prompts
pub fn prompt_category_list() -> String {
    CATEGORIES
        .iter()
        .map(|c| format!("- {}: {}", c.slug, c.keywords.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}
